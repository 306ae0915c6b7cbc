//! Paymail resolver: PKI lookups and contact invitations.
//!
//! The [`PaymailResolver`] trait is the only way the rest of the crate
//! reaches the network. [`HttpPaymailResolver`] implements it over HTTPS:
//!
//! 1. `GET https://{domain}/.well-known/bsvalias` to discover capabilities
//!    (cached per domain)
//! 2. `GET` the expanded `pki` template to fetch the current public key
//! 3. `POST` a [`ContactRequestPayload`] to the expanded PIKE invite template
//!
//! Cancellation follows the usual async rule: dropping a returned future
//! aborts the request. None of these calls change local state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use super::address::SanitizedPaymail;
use super::error::{PaymailError, PaymailResult};
use super::types::{
    expand_template, Capabilities, ContactRequestPayload, PkiResponse, BRFC_PIKE, BRFC_PKI,
    PUBKEY_HEX_LEN,
};
use crate::config::ResolverConfig;

/// Path of the capability discovery document.
const WELL_KNOWN_PATH: &str = "/.well-known/bsvalias";

/// External paymail operations needed by the contacts core.
#[async_trait]
pub trait PaymailResolver: Send + Sync {
    /// Normalizes and validates a raw address. Never touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`PaymailError::InvalidAddress`] for malformed input.
    fn sanitize(&self, raw: &str) -> PaymailResult<SanitizedPaymail> {
        SanitizedPaymail::parse(raw)
    }

    /// Fetches the current hex-encoded public key bound to `paymail`.
    ///
    /// Safe to retry.
    async fn fetch_public_key(&self, paymail: &SanitizedPaymail) -> PaymailResult<String>;

    /// Tells the counterparty's service that the requester wants to be a
    /// contact.
    async fn notify_contact_request(
        &self,
        paymail: &SanitizedPaymail,
        payload: &ContactRequestPayload,
    ) -> PaymailResult<()>;
}

struct CachedCapabilities {
    capabilities: Capabilities,
    fetched_at: Instant,
}

/// HTTP implementation of [`PaymailResolver`].
pub struct HttpPaymailResolver {
    config: ResolverConfig,
    client: reqwest::Client,
    capabilities: Arc<RwLock<HashMap<String, CachedCapabilities>>>,
}

impl HttpPaymailResolver {
    /// Creates a resolver with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PaymailError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: ResolverConfig) -> PaymailResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PaymailError::ClientBuild(e.to_string()))?;

        Ok(Self {
            config,
            client,
            capabilities: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn discovery_url(&self, domain: &str) -> String {
        match &self.config.service_base_url {
            Some(base) => format!("{}{WELL_KNOWN_PATH}", base.trim_end_matches('/')),
            None => format!("https://{domain}{WELL_KNOWN_PATH}"),
        }
    }

    /// Returns capabilities for `domain`, from cache when still fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub async fn capabilities(&self, domain: &str) -> PaymailResult<Capabilities> {
        let ttl = Duration::from_secs(self.config.capabilities_ttl_secs);

        {
            let cache = self.capabilities.read().await;
            if let Some(entry) = cache.get(domain) {
                if entry.fetched_at.elapsed() < ttl {
                    return Ok(entry.capabilities.clone());
                }
            }
        }

        let url = self.discovery_url(domain);
        let capabilities: Capabilities = self.get_json(&url).await?;

        tracing::debug!(domain, "Discovered paymail capabilities");

        {
            let mut cache = self.capabilities.write().await;
            cache.insert(
                domain.to_string(),
                CachedCapabilities {
                    capabilities: capabilities.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }

        Ok(capabilities)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> PaymailResult<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PaymailError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymailError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PaymailError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PaymailResolver for HttpPaymailResolver {
    async fn fetch_public_key(&self, paymail: &SanitizedPaymail) -> PaymailResult<String> {
        let capabilities = self.capabilities(paymail.domain()).await?;
        let template =
            capabilities
                .pki_template()
                .ok_or_else(|| PaymailError::MissingCapability {
                    domain: paymail.domain().to_string(),
                    capability: BRFC_PKI,
                })?;

        let url = expand_template(template, paymail);
        let pki: PkiResponse = self.get_json(&url).await?;

        validate_pki(&url, paymail, &pki)?;
        Ok(pki.pubkey.to_lowercase())
    }

    async fn notify_contact_request(
        &self,
        paymail: &SanitizedPaymail,
        payload: &ContactRequestPayload,
    ) -> PaymailResult<()> {
        let capabilities = self.capabilities(paymail.domain()).await?;
        let template =
            capabilities
                .pike_invite_template()
                .ok_or_else(|| PaymailError::MissingCapability {
                    domain: paymail.domain().to_string(),
                    capability: BRFC_PIKE,
                })?;

        let url = expand_template(template, paymail);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| PaymailError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymailError::Status {
                url,
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

fn validate_pki(url: &str, paymail: &SanitizedPaymail, pki: &PkiResponse) -> PaymailResult<()> {
    let invalid = |reason: String| PaymailError::InvalidResponse {
        url: url.to_string(),
        reason,
    };

    if pki.pubkey.len() != PUBKEY_HEX_LEN {
        return Err(invalid(format!(
            "pubkey must be {PUBKEY_HEX_LEN} hex characters, got {}",
            pki.pubkey.len()
        )));
    }
    hex::decode(&pki.pubkey).map_err(|e| invalid(format!("pubkey is not hex: {e}")))?;

    if !pki.handle.is_empty() && !pki.handle.eq_ignore_ascii_case(paymail.address()) {
        return Err(invalid(format!(
            "handle {} does not match {}",
            pki.handle,
            paymail.address()
        )));
    }

    Ok(())
}
