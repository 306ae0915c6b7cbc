//! Error types for contact operations.
//!
//! [`ContactError`] is the taxonomy callers see. Every variant that comes
//! from a resolver or storage failure keeps the underlying error as its
//! source together with the owner or counterparty it concerned.

use thiserror::Error;

use super::types::{ContactStatus, Transition};
use crate::paymail::PaymailError;

/// A status transition that the state machine refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The edge does not exist from the current status.
    #[error("cannot {transition} a contact with status {from}")]
    Illegal {
        /// The attempted transition.
        transition: Transition,
        /// Status at the time of the attempt.
        from: ContactStatus,
    },

    /// No transition leads to this status.
    #[error("status {0} cannot be set directly")]
    UnreachableTarget(ContactStatus),
}

/// Errors raised by a contact storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A live contact already exists for this owner and paymail.
    #[error("Contact {paymail} already exists for owner {owner_id}")]
    Duplicate {
        /// Owner of the contact.
        owner_id: String,
        /// Counterparty paymail.
        paymail: String,
    },

    /// The contact was soft-deleted; it can no longer be written.
    #[error("Contact {0} has been deleted")]
    Deleted(String),

    /// Stored data could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A filter or ordering names an unknown field.
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error type for contact operations.
#[derive(Error, Debug)]
pub enum ContactError {
    /// The counterparty paymail is malformed.
    #[error("Requested contact paymail is invalid")]
    InvalidAddress(#[source] PaymailError),

    /// The counterparty's public key could not be fetched.
    #[error("Getting PKI for {paymail} failed")]
    PkiLookupFailed {
        /// Counterparty paymail.
        paymail: String,
        /// Resolver failure.
        #[source]
        source: PaymailError,
    },

    /// No live contact matches.
    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// The requested status change is not allowed.
    #[error("Incorrect status for contact {paymail}")]
    IncorrectStatus {
        /// Counterparty paymail.
        paymail: String,
        /// Why the state machine refused.
        #[source]
        source: TransitionError,
    },

    /// Persisting the contact failed; nothing was changed.
    #[error("Saving contact {paymail} for owner {owner_id} failed")]
    SaveContactFailed {
        /// Owner of the contact.
        owner_id: String,
        /// Counterparty paymail.
        paymail: String,
        /// Storage failure.
        #[source]
        source: StoreError,
    },

    /// The caller has no (or a foreign) paymail to request from.
    #[error("Invalid requester identity: {0}")]
    InvalidRequesterIdentity(String),

    /// The caller has several paymails and none was chosen.
    #[error("More than one paymail registered for owner {0}")]
    MultiplePaymailsRegistered(String),

    /// The contact was saved but the counterparty was not notified.
    #[error("Adding contact request for {paymail} failed")]
    AddingContactRequestFailed {
        /// Counterparty paymail.
        paymail: String,
        /// Resolver failure.
        #[source]
        source: PaymailError,
    },

    /// A list or count condition names an unknown field.
    #[error("Invalid query condition: {0}")]
    InvalidCondition(String),

    /// Reading from storage failed.
    #[error("Storage error while {context}")]
    Storage {
        /// What was being read.
        context: String,
        /// Storage failure.
        #[source]
        source: StoreError,
    },

    /// The service could not be set up.
    #[error("Initialization failed: {0}")]
    Initialization(String),
}

/// Result type alias for contact operations.
pub type Result<T> = std::result::Result<T, ContactError>;
