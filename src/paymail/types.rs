//! Wire types exchanged with paymail services.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::address::SanitizedPaymail;

/// Capability name for public key infrastructure lookups.
pub const BRFC_PKI: &str = "pki";

/// Alternate BRFC id some services use for the PKI capability.
pub const BRFC_PKI_ALTERNATE: &str = "0c4339ef99c2";

/// BRFC id of the PIKE (contact exchange) capability.
pub const BRFC_PIKE: &str = "935478af7bf2";

/// Expected length of a hex-encoded compressed public key.
pub const PUBKEY_HEX_LEN: usize = 66;

/// Capabilities document served at `/.well-known/bsvalias`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Capabilities {
    /// Protocol version.
    #[serde(default)]
    pub bsvalias: String,
    /// Capability id to endpoint template (or nested object).
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
}

impl Capabilities {
    /// Returns the PKI endpoint template, if advertised.
    #[must_use]
    pub fn pki_template(&self) -> Option<&str> {
        [BRFC_PKI, BRFC_PKI_ALTERNATE]
            .iter()
            .find_map(|key| self.capabilities.get(*key).and_then(Value::as_str))
    }

    /// Returns the PIKE invite endpoint template, if advertised.
    ///
    /// Services either publish the URL directly or nest it under an
    /// `invite` key next to other PIKE endpoints.
    #[must_use]
    pub fn pike_invite_template(&self) -> Option<&str> {
        match self.capabilities.get(BRFC_PIKE)? {
            Value::String(url) => Some(url),
            Value::Object(endpoints) => endpoints.get("invite").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Expands `{alias}` and `{domain.tld}` placeholders in an endpoint template.
#[must_use]
pub fn expand_template(template: &str, paymail: &SanitizedPaymail) -> String {
    template
        .replace("{alias}", paymail.alias())
        .replace("{domain.tld}", paymail.domain())
}

/// Response of a PKI lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PkiResponse {
    /// Protocol version.
    #[serde(default)]
    pub bsvalias: String,
    /// The paymail the key belongs to.
    #[serde(default)]
    pub handle: String,
    /// Hex-encoded public key.
    pub pubkey: String,
}

/// Body of a contact invitation sent to the counterparty's service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequestPayload {
    /// Display name of the requester.
    pub full_name: String,
    /// Paymail of the requester.
    pub paymail: String,
}
