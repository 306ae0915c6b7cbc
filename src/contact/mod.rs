//! Contact relationships between paymail identities.
//!
//! A contact is one owner's view of a relationship with another paymail.
//! Each side of a relationship keeps its own record, so the two records are
//! created and changed independently.
//!
//! # Architecture
//!
//! ```text
//! ContactManager (use-case API)
//!     ├── PaymailResolver (sanitize, PKI lookup, invitation)
//!     ├── Contact (status state machine)
//!     └── ContactStore + PaymailDirectory (SQLite)
//! ```
//!
//! # Types
//!
//! - [`Contact`]: A relationship record with an encapsulated status
//! - [`ContactStatus`]: `awaiting`, `unconfirmed`, `confirmed`, `rejected`
//! - [`Transition`]: The named status changes
//! - [`UpsertOutcome`]: A saved contact plus an optional notification failure

mod error;
mod manager;
mod storage;
pub mod types;

pub use error::{ContactError, Result, StoreError, StoreResult, TransitionError};
pub use manager::{ContactManager, UpsertOutcome};
pub use storage::{
    ContactFilter, ContactStore, PaymailDirectory, QueryParams, SortDirection,
    SqliteContactStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use types::{
    owner_id_from_xpub, Contact, ContactParts, ContactStatus, Metadata, PaymailAddress,
    Transition,
};
