//! Error types for paymail resolution.
//!
//! These errors describe failures talking to a counterparty's paymail
//! service: malformed addresses, capability discovery, PKI lookups and
//! contact invitation delivery.

use thiserror::Error;

/// Errors that can occur while resolving or contacting a paymail.
#[derive(Debug, Error)]
pub enum PaymailError {
    /// The address is not a valid paymail.
    #[error("Invalid paymail address {address:?}: {reason}")]
    InvalidAddress {
        /// The raw input that failed validation.
        address: String,
        /// Which rule rejected it.
        reason: &'static str,
    },

    /// HTTP transport failed before a response was received.
    #[error("Request to {url} failed: {reason}")]
    Http {
        /// The requested URL.
        url: String,
        /// The transport error.
        reason: String,
    },

    /// The paymail service answered with a non-success status.
    #[error("Request to {url} returned status {status}")]
    Status {
        /// The requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The domain does not advertise a required capability.
    #[error("Domain {domain} does not support capability {capability}")]
    MissingCapability {
        /// The paymail domain.
        domain: String,
        /// The BRFC id or name of the capability.
        capability: &'static str,
    },

    /// The service returned a body that could not be understood.
    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse {
        /// The requested URL.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Result type for paymail operations.
pub type PaymailResult<T> = Result<T, PaymailError>;
