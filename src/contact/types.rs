//! Core types for contact relationships.
//!
//! A [`Contact`] is one owner's view of a relationship with another
//! paymail. Its status can only change through the named transitions in
//! [`Transition`]; there is no setter.
//!
//! ```text
//!   (invite)                     (request)
//!      │                             │
//!      ▼                             ▼
//! AwaitAccept ──accept──▶ NotConfirmed ◀──unconfirm── Confirmed
//!      │                     │   └────────confirm────────▲
//!      │                     │                           │
//!      └──────reject─────────┴──────────reject───────────┘──▶ Rejected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::TransitionError;
use crate::paymail::SanitizedPaymail;

/// Free-form metadata attached to a contact.
pub type Metadata = Map<String, Value>;

/// Lifecycle status of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// Invitation received from the counterparty, not yet accepted.
    #[serde(rename = "awaiting")]
    AwaitAccept,
    /// Relationship exists but the public key is not yet confirmed.
    #[serde(rename = "unconfirmed")]
    NotConfirmed,
    /// Public key confirmed out of band.
    Confirmed,
    /// Relationship rejected. Terminal.
    Rejected,
}

impl ContactStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::AwaitAccept,
        Self::NotConfirmed,
        Self::Confirmed,
        Self::Rejected,
    ];

    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitAccept => "awaiting",
            Self::NotConfirmed => "unconfirmed",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting" => Some(Self::AwaitAccept),
            "unconfirmed" => Some(Self::NotConfirmed),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// `AwaitAccept -> NotConfirmed`.
    Accept,
    /// `NotConfirmed -> Confirmed`.
    Confirm,
    /// `Confirmed -> NotConfirmed`.
    Unconfirm,
    /// `AwaitAccept | NotConfirmed | Confirmed -> Rejected`.
    Reject,
}

impl Transition {
    /// All transitions.
    pub const ALL: [Self; 4] = [Self::Accept, Self::Confirm, Self::Unconfirm, Self::Reject];

    /// Returns the status reached from `from`, or `None` if the edge does
    /// not exist.
    #[must_use]
    pub const fn target(self, from: ContactStatus) -> Option<ContactStatus> {
        use ContactStatus::{AwaitAccept, Confirmed, NotConfirmed, Rejected};

        match (self, from) {
            (Self::Accept, AwaitAccept) | (Self::Unconfirm, Confirmed) => Some(NotConfirmed),
            (Self::Confirm, NotConfirmed) => Some(Confirmed),
            (Self::Reject, AwaitAccept | NotConfirmed | Confirmed) => Some(Rejected),
            _ => None,
        }
    }

    /// Returns the transition an administrator uses to drive a contact to
    /// `status`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::UnreachableTarget`] for `AwaitAccept`,
    /// which no transition leads to.
    pub const fn toward(status: ContactStatus) -> Result<Self, TransitionError> {
        match status {
            ContactStatus::NotConfirmed => Ok(Self::Accept),
            ContactStatus::Confirmed => Ok(Self::Confirm),
            ContactStatus::Rejected => Ok(Self::Reject),
            ContactStatus::AwaitAccept => Err(TransitionError::UnreachableTarget(status)),
        }
    }

    /// Lowercase verb for messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Confirm => "confirm",
            Self::Unconfirm => "unconfirm",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored fields of a contact, used by storage backends to rebuild one.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq)]
pub struct ContactParts {
    /// Unique identifier.
    pub id: String,
    /// Hashed identifier of the owning wallet.
    pub owner_id: String,
    /// Canonical paymail of the counterparty.
    pub paymail: String,
    /// Hex public key from the last PKI lookup.
    pub pub_key: String,
    /// Display name.
    pub full_name: String,
    /// Persisted status.
    pub status: ContactStatus,
    /// Metadata.
    pub metadata: Metadata,
    /// Creation time (Unix seconds).
    pub created_at: i64,
    /// Last update time (Unix seconds).
    pub updated_at: i64,
    /// Soft-delete time (Unix seconds).
    pub deleted_at: Option<i64>,
}

/// One owner's view of a relationship with another paymail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    id: String,
    owner_id: String,
    paymail: String,
    pub_key: String,
    full_name: String,
    status: ContactStatus,
    metadata: Metadata,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl Contact {
    fn new(
        owner_id: &str,
        paymail: &SanitizedPaymail,
        pub_key: &str,
        full_name: &str,
        status: ContactStatus,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            paymail: paymail.address().to_string(),
            pub_key: pub_key.to_string(),
            full_name: full_name.to_string(),
            status,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Creates a contact for an invitation received from the counterparty.
    ///
    /// Starts in [`ContactStatus::AwaitAccept`].
    #[must_use]
    pub fn new_invitation(
        owner_id: &str,
        paymail: &SanitizedPaymail,
        pub_key: &str,
        full_name: &str,
    ) -> Self {
        Self::new(
            owner_id,
            paymail,
            pub_key,
            full_name,
            ContactStatus::AwaitAccept,
        )
    }

    /// Creates a contact the owner is actively requesting.
    ///
    /// Starts in [`ContactStatus::NotConfirmed`].
    #[must_use]
    pub fn new_request(
        owner_id: &str,
        paymail: &SanitizedPaymail,
        pub_key: &str,
        full_name: &str,
    ) -> Self {
        Self::new(
            owner_id,
            paymail,
            pub_key,
            full_name,
            ContactStatus::NotConfirmed,
        )
    }

    /// Rebuilds a contact from persisted fields.
    ///
    /// Storage-only rehydration for [`ContactStore`](super::ContactStore)
    /// backends. The fields are trusted as written by a previous save, so
    /// no transition is checked. Domain code creates contacts with
    /// [`Contact::new_invitation`] or [`Contact::new_request`].
    #[doc(hidden)]
    #[must_use]
    pub fn restore(parts: ContactParts) -> Self {
        Self {
            id: parts.id,
            owner_id: parts.owner_id,
            paymail: parts.paymail,
            pub_key: parts.pub_key,
            full_name: parts.full_name,
            status: parts.status,
            metadata: parts.metadata,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            deleted_at: parts.deleted_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub fn paymail(&self) -> &str {
        &self.paymail
    }

    #[must_use]
    pub fn pub_key(&self) -> &str {
        &self.pub_key
    }

    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub const fn status(&self) -> ContactStatus {
        self.status
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> i64 {
        self.updated_at
    }

    #[must_use]
    pub const fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }

    /// Whether the contact has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Applies a status transition.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Illegal`] if the edge does not exist from
    /// the current status. The status is left unchanged.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        let target = transition
            .target(self.status)
            .ok_or(TransitionError::Illegal {
                transition,
                from: self.status,
            })?;
        self.status = target;
        self.touch();
        Ok(())
    }

    /// Marks an invitation as accepted.
    ///
    /// # Errors
    ///
    /// Fails unless the contact is awaiting acceptance.
    pub fn accept(&mut self) -> Result<(), TransitionError> {
        self.apply(Transition::Accept)
    }

    /// Marks the contact's key as confirmed.
    ///
    /// # Errors
    ///
    /// Fails unless the contact is not yet confirmed.
    pub fn confirm(&mut self) -> Result<(), TransitionError> {
        self.apply(Transition::Confirm)
    }

    /// Reverts a confirmation.
    ///
    /// # Errors
    ///
    /// Fails unless the contact is confirmed.
    pub fn unconfirm(&mut self) -> Result<(), TransitionError> {
        self.apply(Transition::Unconfirm)
    }

    /// Rejects the relationship.
    ///
    /// # Errors
    ///
    /// Fails if the contact is already rejected.
    pub fn reject(&mut self) -> Result<(), TransitionError> {
        self.apply(Transition::Reject)
    }

    /// Stores a freshly looked-up public key.
    ///
    /// Returns `true` if the key changed and the contact needs saving.
    pub fn update_pub_key(&mut self, pub_key: &str) -> bool {
        if self.pub_key == pub_key {
            return false;
        }
        self.pub_key = pub_key.to_string();
        self.touch();
        true
    }

    /// Replaces the display name.
    pub fn set_full_name(&mut self, full_name: &str) {
        if self.full_name != full_name {
            self.full_name = full_name.to_string();
            self.touch();
        }
    }

    /// Merges metadata into the contact. A `null` value removes the key.
    pub fn merge_metadata(&mut self, metadata: &Metadata) {
        if metadata.is_empty() {
            return;
        }
        for (key, value) in metadata {
            if value.is_null() {
                self.metadata.remove(key);
            } else {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
        self.touch();
    }

    /// Soft-deletes the contact.
    pub fn delete(&mut self) {
        let now = chrono::Utc::now().timestamp();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

/// A paymail address registered to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymailAddress {
    /// Hashed identifier of the owning wallet.
    pub owner_id: String,
    /// Part before `@`.
    pub alias: String,
    /// Part after `@`.
    pub domain: String,
    /// Name shown to counterparties.
    pub public_name: String,
    /// Optional avatar URL.
    pub avatar: Option<String>,
}

impl PaymailAddress {
    /// Creates a paymail registration from a sanitized address.
    pub fn new(
        owner_id: impl Into<String>,
        paymail: &SanitizedPaymail,
        public_name: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            alias: paymail.alias().to_string(),
            domain: paymail.domain().to_string(),
            public_name: public_name.into(),
            avatar: None,
        }
    }

    /// The full `alias@domain` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

/// Derives the hashed owner identifier from an extended public key.
///
/// Owners are referenced by the hex SHA-256 of their xpub string rather
/// than by the key itself.
#[must_use]
pub fn owner_id_from_xpub(xpub: &str) -> String {
    hex::encode(Sha256::digest(xpub.as_bytes()))
}
