//! Paymail identity resolution.
//!
//! Everything that talks to a counterparty's paymail service lives here,
//! so the rest of the crate never touches the network directly.
//!
//! # Architecture
//!
//! ```text
//! PaymailResolver (trait)
//!     └── HttpPaymailResolver
//!             ├── capability discovery (/.well-known/bsvalias, cached)
//!             ├── PKI lookup            (pki)
//!             └── contact invitation    (PIKE invite)
//! ```
//!
//! # Types
//!
//! - [`SanitizedPaymail`]: A validated, canonical `alias@domain`
//! - [`ContactRequestPayload`]: Invitation body sent to the counterparty
//! - [`Capabilities`]: A domain's advertised endpoints

mod address;
mod error;
mod resolver;
pub mod types;

pub use address::SanitizedPaymail;
pub use error::{PaymailError, PaymailResult};
pub use resolver::{HttpPaymailResolver, PaymailResolver};
pub use types::{Capabilities, ContactRequestPayload, PkiResponse};
