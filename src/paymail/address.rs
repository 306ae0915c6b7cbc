//! Paymail address sanitization.
//!
//! A paymail looks like an email address (`alias@domain.tld`). Before any
//! network call the raw input is normalized: surrounding whitespace and a
//! `mailto:` prefix are dropped, everything is lowercased, and a leading
//! `www.` on the domain is removed. The result is then validated
//! structurally.

use std::fmt;
use std::str::FromStr;

use super::error::{PaymailError, PaymailResult};

const MAX_ALIAS_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A validated, canonical paymail address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedPaymail {
    alias: String,
    domain: String,
    address: String,
}

impl SanitizedPaymail {
    /// Normalizes and validates a raw paymail string.
    ///
    /// # Errors
    ///
    /// Returns [`PaymailError::InvalidAddress`] if the input is not a
    /// well-formed paymail after normalization.
    pub fn parse(raw: &str) -> PaymailResult<Self> {
        let invalid = |reason| PaymailError::InvalidAddress {
            address: raw.to_string(),
            reason,
        };

        let mut normalized = raw.trim().to_lowercase();
        if let Some(rest) = normalized.strip_prefix("mailto:") {
            normalized = rest.trim().to_string();
        }

        let (alias, domain) = normalized
            .split_once('@')
            .ok_or_else(|| invalid("missing @ separator"))?;
        let domain = domain.strip_prefix("www.").unwrap_or(domain);

        validate_alias(alias).map_err(invalid)?;
        validate_domain(domain).map_err(invalid)?;

        Ok(Self {
            alias: alias.to_string(),
            domain: domain.to_string(),
            address: format!("{alias}@{domain}"),
        })
    }

    /// The part before `@`.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The part after `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The full canonical address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for SanitizedPaymail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl FromStr for SanitizedPaymail {
    type Err = PaymailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_alias(alias: &str) -> Result<(), &'static str> {
    if alias.is_empty() {
        return Err("missing alias");
    }
    if alias.len() > MAX_ALIAS_LEN {
        return Err("alias too long");
    }
    if !alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
    {
        return Err("alias contains invalid characters");
    }
    if alias.starts_with('.') || alias.ends_with('.') || alias.contains("..") {
        return Err("alias has misplaced dots");
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), &'static str> {
    if domain.is_empty() {
        return Err("missing domain");
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err("domain too long");
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain needs a top-level domain");
    }

    for label in &labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err("domain label has invalid length");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err("domain contains invalid characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("domain label starts or ends with a hyphen");
        }
    }

    // split always yields at least one element and we checked for two
    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("invalid top-level domain");
    }

    Ok(())
}
