//! Configuration for the contacts service.
//!
//! Configuration can be built in code with the `with_*` builders or loaded
//! from a TOML document:
//!
//! ```toml
//! database_path = "/var/lib/wallet/contacts.db"
//!
//! [resolver]
//! timeout_secs = 10
//! capabilities_ttl_secs = 600
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or has the wrong shape.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Configuration for the paymail resolver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How long discovered capabilities are cached per domain.
    #[serde(default = "default_capabilities_ttl")]
    pub capabilities_ttl_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base URL used instead of `https://{domain}` for capability discovery.
    #[serde(default)]
    pub service_base_url: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_capabilities_ttl() -> u64 {
    3600
}

fn default_user_agent() -> String {
    concat!("paymail-contacts/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            capabilities_ttl_secs: default_capabilities_ttl(),
            user_agent: default_user_agent(),
            service_base_url: None,
        }
    }
}

impl ResolverConfig {
    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the capabilities cache lifetime.
    #[must_use]
    pub const fn with_capabilities_ttl(mut self, secs: u64) -> Self {
        self.capabilities_ttl_secs = secs;
        self
    }

    /// Route capability discovery to a fixed base URL.
    #[must_use]
    pub fn with_service_base_url(mut self, url: impl Into<String>) -> Self {
        self.service_base_url = Some(url.into());
        self
    }

    /// Checks that values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "resolver.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactsConfig {
    /// `SQLite` database file for contacts and paymail addresses.
    pub database_path: PathBuf,

    /// Paymail resolver settings.
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl ContactsConfig {
    /// Creates a configuration with default resolver settings.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            resolver: ResolverConfig::default(),
        }
    }

    /// Replaces the resolver settings.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.resolver.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}
