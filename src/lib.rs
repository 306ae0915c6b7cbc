//! Paymail Contacts
//!
//! Contact relationships between paymail wallet identities: resolving a
//! counterparty's verified public key, notifying their paymail service of a
//! contact request, and keeping a local relationship record whose status
//! only changes through a small state machine.
//!
//! # Modules
//!
//! - [`paymail`]: Address sanitization and the paymail resolver
//! - [`contact`]: Contact records, storage and the [`ContactManager`]
//! - [`config`]: Configuration loaded from TOML

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod config;
pub mod contact;
pub mod paymail;

pub use config::{ConfigError, ContactsConfig, ResolverConfig};
pub use contact::{
    Contact, ContactError, ContactFilter, ContactManager, ContactStatus, Metadata, QueryParams,
    UpsertOutcome,
};
pub use paymail::{HttpPaymailResolver, PaymailError, PaymailResolver, SanitizedPaymail};
