//! High-level contact relationship API.
//!
//! [`ContactManager`] coordinates the [`PaymailResolver`] (external identity
//! checks) and the [`Contact`] state machine against a [`ContactStore`].
//!
//! # Write path
//!
//! Every write follows the same shape:
//!
//! ```text
//! load ──▶ mutate a local copy ──▶ save ──▶ return the copy
//!                                    │
//!                                    └── the only commit point
//! ```
//!
//! A failed save returns [`ContactError::SaveContactFailed`] and the mutated
//! copy is dropped. Dropping an operation future before its save completes
//! leaves storage untouched; a save that already completed is kept.
//!
//! # Uniqueness
//!
//! The manager takes no locks. Two concurrent creates for the same owner and
//! counterparty race to the store, which rejects the loser with
//! [`StoreError::Duplicate`]. The loser reloads the winner's record and
//! applies its change as an update.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::error::{ContactError, Result, StoreError, TransitionError};
use super::storage::{ContactFilter, ContactStore, PaymailDirectory, QueryParams, SqliteContactStore};
use super::types::{Contact, ContactStatus, Metadata, PaymailAddress, Transition};
use crate::config::ContactsConfig;
use crate::paymail::{ContactRequestPayload, HttpPaymailResolver, PaymailResolver, SanitizedPaymail};

/// Result of [`ContactManager::upsert_contact`].
///
/// The contact is always persisted when this value exists. A notification
/// failure after the save is carried alongside it instead of replacing it.
#[derive(Debug)]
pub struct UpsertOutcome {
    contact: Contact,
    notification_error: Option<ContactError>,
}

impl UpsertOutcome {
    const fn complete(contact: Contact) -> Self {
        Self {
            contact,
            notification_error: None,
        }
    }

    const fn degraded(contact: Contact, error: ContactError) -> Self {
        Self {
            contact,
            notification_error: Some(error),
        }
    }

    /// The persisted contact.
    #[must_use]
    pub const fn contact(&self) -> &Contact {
        &self.contact
    }

    /// The notification failure, if the counterparty was not told.
    #[must_use]
    pub const fn notification_error(&self) -> Option<&ContactError> {
        self.notification_error.as_ref()
    }

    /// Whether the counterparty notification failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.notification_error.is_some()
    }

    /// Splits into the contact and the optional notification failure.
    #[must_use]
    pub fn into_parts(self) -> (Contact, Option<ContactError>) {
        (self.contact, self.notification_error)
    }

    /// Takes the contact, discarding any notification failure.
    #[must_use]
    pub fn into_contact(self) -> Contact {
        self.contact
    }

    /// Treats a degraded outcome as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::AddingContactRequestFailed`] if the
    /// notification failed. The contact is still persisted in that case.
    pub fn into_result(self) -> Result<Contact> {
        match self.notification_error {
            None => Ok(self.contact),
            Some(err) => Err(err),
        }
    }
}

/// High-level API for contact relationships.
///
/// Every operation takes the caller's owner identity explicitly, or a
/// contact id for the administrative paths.
///
/// # Example
///
/// ```ignore
/// use paymail_contacts::{ContactManager, ContactsConfig};
///
/// let manager = ContactManager::open(&ContactsConfig::new("/data/contacts.db"))?;
/// let outcome = manager
///     .upsert_contact(owner_id, "Bob", "bob@example.com", None, None)
///     .await?;
/// if let Some(err) = outcome.notification_error() {
///     // saved locally, counterparty not notified
/// }
/// ```
pub struct ContactManager {
    store: Arc<dyn ContactStore>,
    directory: Arc<dyn PaymailDirectory>,
    resolver: Arc<dyn PaymailResolver>,
}

impl ContactManager {
    /// Creates a manager from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn ContactStore>,
        directory: Arc<dyn PaymailDirectory>,
        resolver: Arc<dyn PaymailResolver>,
    ) -> Self {
        Self {
            store,
            directory,
            resolver,
        }
    }

    /// Creates a manager that uses one `SQLite` store for contacts and
    /// registered paymails.
    #[must_use]
    pub fn with_sqlite(store: Arc<SqliteContactStore>, resolver: Arc<dyn PaymailResolver>) -> Self {
        Self {
            store: store.clone(),
            directory: store,
            resolver,
        }
    }

    /// Opens `SQLite` storage and the HTTP resolver described by `config`.
    ///
    /// Creates the database's parent directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::Initialization`] if the configuration is
    /// invalid or either collaborator cannot be created.
    pub fn open(config: &ContactsConfig) -> Result<Self> {
        config
            .resolver
            .validate()
            .map_err(|e| ContactError::Initialization(e.to_string()))?;

        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ContactError::Initialization(format!("Failed to create data directory: {e}"))
                })?;
            }
        }

        let store = Self::open_store(&config.database_path)?;
        let resolver = HttpPaymailResolver::new(config.resolver.clone())
            .map_err(|e| ContactError::Initialization(e.to_string()))?;

        Ok(Self::with_sqlite(store, Arc::new(resolver)))
    }

    fn open_store(path: &Path) -> Result<Arc<SqliteContactStore>> {
        SqliteContactStore::new(path)
            .map(Arc::new)
            .map_err(|e| ContactError::Initialization(e.to_string()))
    }

    // ==================== Relationship Requests ====================

    /// Creates or refreshes the caller's contact with `paymail` and notifies
    /// the counterparty.
    ///
    /// The requester is `requester_paymail` when given (it must be
    /// registered to `owner_id`), otherwise the caller's only registered
    /// paymail. A new contact starts in [`ContactStatus::NotConfirmed`]; an
    /// existing one gets the new name, the current public key and merged
    /// metadata, keeping its status.
    ///
    /// # Errors
    ///
    /// - [`ContactError::InvalidRequesterIdentity`] or
    ///   [`ContactError::MultiplePaymailsRegistered`] if the requester cannot
    ///   be resolved
    /// - [`ContactError::InvalidAddress`] for a malformed `paymail`
    /// - [`ContactError::PkiLookupFailed`] if the key lookup fails
    /// - [`ContactError::SaveContactFailed`] if the save fails
    ///
    /// A failed notification is not an error here; see [`UpsertOutcome`].
    pub async fn upsert_contact(
        &self,
        owner_id: &str,
        full_name: &str,
        paymail: &str,
        requester_paymail: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<UpsertOutcome> {
        let requester = self.resolve_requester(owner_id, requester_paymail).await?;
        let counterparty = self.sanitize(paymail)?;
        let pub_key = self.fetch_pub_key(&counterparty).await?;

        let contact = match self.load_by_key(owner_id, counterparty.address()).await? {
            Some(existing) => {
                let updated = refresh_contact(existing, full_name, &pub_key, metadata);
                self.save(updated).await?
            }
            None => {
                let mut created =
                    Contact::new_request(owner_id, &counterparty, &pub_key, full_name);
                if let Some(metadata) = metadata {
                    created.merge_metadata(metadata);
                }
                match self.insert(created).await? {
                    Inserted::Created(contact) => contact,
                    Inserted::Existing(existing) => {
                        let updated = refresh_contact(existing, full_name, &pub_key, metadata);
                        self.save(updated).await?
                    }
                }
            }
        };

        let payload = ContactRequestPayload {
            full_name: requester.public_name.clone(),
            paymail: requester.address(),
        };

        match self
            .resolver
            .notify_contact_request(&counterparty, &payload)
            .await
        {
            Ok(()) => {
                debug!(
                    owner = owner_id,
                    paymail = contact.paymail(),
                    requester = %payload.paymail,
                    "Contact upserted and counterparty notified"
                );
                Ok(UpsertOutcome::complete(contact))
            }
            Err(e) => {
                warn!(
                    owner = owner_id,
                    paymail = contact.paymail(),
                    requester = %payload.paymail,
                    error = %e,
                    "Adding contact request failed"
                );
                let err = ContactError::AddingContactRequestFailed {
                    paymail: contact.paymail().to_string(),
                    source: e,
                };
                Ok(UpsertOutcome::degraded(contact, err))
            }
        }
    }

    /// Records an invitation received from `paymail`.
    ///
    /// Creates the contact in [`ContactStatus::AwaitAccept`] if none exists.
    /// For an existing contact only the public key is refreshed, and the
    /// contact is saved only when the key changed. Nothing is sent to the
    /// counterparty.
    ///
    /// # Errors
    ///
    /// - [`ContactError::InvalidAddress`] for a malformed `paymail`
    /// - [`ContactError::PkiLookupFailed`] if the key lookup fails
    /// - [`ContactError::SaveContactFailed`] if the save fails
    pub async fn add_contact_request(
        &self,
        owner_id: &str,
        full_name: &str,
        paymail: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Contact> {
        let counterparty = self.sanitize(paymail)?;
        let pub_key = self.fetch_pub_key(&counterparty).await?;

        let existing = match self.load_by_key(owner_id, counterparty.address()).await? {
            Some(existing) => existing,
            None => {
                let mut created =
                    Contact::new_invitation(owner_id, &counterparty, &pub_key, full_name);
                if let Some(metadata) = metadata {
                    created.merge_metadata(metadata);
                }
                match self.insert(created).await? {
                    Inserted::Created(contact) => {
                        debug!(owner = owner_id, paymail = contact.paymail(), "Invitation recorded");
                        return Ok(contact);
                    }
                    Inserted::Existing(existing) => existing,
                }
            }
        };

        let mut contact = existing;
        if contact.update_pub_key(&pub_key) {
            debug!(owner = owner_id, paymail = contact.paymail(), "Contact public key changed");
            return self.save(contact).await;
        }

        Ok(contact)
    }

    // ==================== Status Transitions ====================

    /// Accepts an invitation, moving it to [`ContactStatus::NotConfirmed`].
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact,
    /// [`ContactError::IncorrectStatus`] unless it is awaiting acceptance, or
    /// [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn accept_contact(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        self.transition(owner_id, paymail, Transition::Accept).await
    }

    /// Rejects a contact. [`ContactStatus::Rejected`] is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact,
    /// [`ContactError::IncorrectStatus`] if it is already rejected, or
    /// [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn reject_contact(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        self.transition(owner_id, paymail, Transition::Reject).await
    }

    /// Confirms a contact's public key.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact,
    /// [`ContactError::IncorrectStatus`] unless it is
    /// [`ContactStatus::NotConfirmed`], or
    /// [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn confirm_contact(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        self.transition(owner_id, paymail, Transition::Confirm).await
    }

    /// Reverts a confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact,
    /// [`ContactError::IncorrectStatus`] unless it is
    /// [`ContactStatus::Confirmed`], or
    /// [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn unconfirm_contact(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        self.transition(owner_id, paymail, Transition::Unconfirm).await
    }

    async fn transition(
        &self,
        owner_id: &str,
        paymail: &str,
        transition: Transition,
    ) -> Result<Contact> {
        let counterparty = self.sanitize(paymail)?;
        let contact = self.require_by_key(owner_id, counterparty.address()).await?;
        let contact = apply_transition(contact, transition)?;
        self.save(contact).await
    }

    // ==================== Administration ====================

    /// Drives a contact to `status` through the matching transition.
    ///
    /// [`ContactStatus::NotConfirmed`] uses accept,
    /// [`ContactStatus::Confirmed`] uses confirm and
    /// [`ContactStatus::Rejected`] uses reject, so the usual legality rules
    /// apply. [`ContactStatus::AwaitAccept`] is never a valid target.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact,
    /// [`ContactError::IncorrectStatus`] for an illegal or unreachable
    /// target, or [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn admin_change_status(&self, id: &str, status: ContactStatus) -> Result<Contact> {
        let contact = self.require_by_id(id).await?;

        let transition = Transition::toward(status).map_err(|source| {
            warn!(
                owner = contact.owner_id(),
                paymail = contact.paymail(),
                error = %source,
                "Rejected administrative status change"
            );
            ContactError::IncorrectStatus {
                paymail: contact.paymail().to_string(),
                source,
            }
        })?;

        let contact = apply_transition(contact, transition)?;
        self.save(contact).await
    }

    /// Replaces a contact's name and merges `metadata` into it.
    ///
    /// Status and public key are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no such contact
    /// or [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn update_contact(
        &self,
        id: &str,
        full_name: &str,
        metadata: &Metadata,
    ) -> Result<Contact> {
        let mut contact = self.require_by_id(id).await?;
        contact.set_full_name(full_name);
        contact.merge_metadata(metadata);
        self.save(contact).await
    }

    // ==================== Deletion ====================

    /// Soft-deletes the caller's contact with `paymail`.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no live contact
    /// (including one already deleted) or
    /// [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn delete_contact(&self, owner_id: &str, paymail: &str) -> Result<()> {
        let counterparty = self.sanitize(paymail)?;
        let mut contact = self.require_by_key(owner_id, counterparty.address()).await?;
        contact.delete();
        self.save(contact).await?;
        Ok(())
    }

    /// Soft-deletes a contact by id.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is no live contact
    /// or [`ContactError::SaveContactFailed`] if the save fails.
    pub async fn delete_contact_by_id(&self, id: &str) -> Result<()> {
        let mut contact = self.require_by_id(id).await?;
        contact.delete();
        self.save(contact).await?;
        Ok(())
    }

    // ==================== Queries ====================

    /// Gets the caller's live contact with `paymail`.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is none.
    pub async fn get_contact(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        let counterparty = self.sanitize(paymail)?;
        self.require_by_key(owner_id, counterparty.address()).await
    }

    /// Gets a live contact by id.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::ContactNotFound`] if there is none.
    pub async fn get_contact_by_id(&self, id: &str) -> Result<Contact> {
        self.require_by_id(id).await
    }

    /// Lists live contacts matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::InvalidCondition`] for an unknown filter or
    /// ordering field, or [`ContactError::Storage`] if the read fails.
    pub async fn get_contacts(
        &self,
        filter: &ContactFilter,
        params: &QueryParams,
    ) -> Result<Vec<Contact>> {
        self.store
            .list(filter, params)
            .await
            .map_err(|e| read_error("listing contacts", e))
    }

    /// Lists one owner's live contacts matching `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_contacts`].
    pub async fn get_contacts_by_owner(
        &self,
        owner_id: &str,
        filter: ContactFilter,
        params: &QueryParams,
    ) -> Result<Vec<Contact>> {
        let filter = ContactFilter {
            owner_id: Some(owner_id.to_string()),
            ..filter
        };
        self.get_contacts(&filter, params).await
    }

    /// Counts live contacts matching `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_contacts`].
    pub async fn get_contacts_count(&self, filter: &ContactFilter) -> Result<u64> {
        self.store
            .count(filter)
            .await
            .map_err(|e| read_error("counting contacts", e))
    }

    /// Counts one owner's live contacts matching `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_contacts`].
    pub async fn get_contacts_by_owner_count(
        &self,
        owner_id: &str,
        filter: ContactFilter,
    ) -> Result<u64> {
        let filter = ContactFilter {
            owner_id: Some(owner_id.to_string()),
            ..filter
        };
        self.get_contacts_count(&filter).await
    }

    // ==================== Helpers ====================

    fn sanitize(&self, paymail: &str) -> Result<SanitizedPaymail> {
        self.resolver
            .sanitize(paymail)
            .map_err(ContactError::InvalidAddress)
    }

    async fn fetch_pub_key(&self, paymail: &SanitizedPaymail) -> Result<String> {
        self.resolver
            .fetch_public_key(paymail)
            .await
            .map_err(|source| {
                warn!(paymail = paymail.address(), error = %source, "Getting PKI failed");
                ContactError::PkiLookupFailed {
                    paymail: paymail.address().to_string(),
                    source,
                }
            })
    }

    async fn resolve_requester(
        &self,
        owner_id: &str,
        requester_paymail: Option<&str>,
    ) -> Result<PaymailAddress> {
        if let Some(raw) = requester_paymail {
            let requester = self.resolver.sanitize(raw).map_err(|_| {
                ContactError::InvalidRequesterIdentity(format!("{raw} is not a valid paymail"))
            })?;

            let found = self
                .directory
                .paymail_by_address(&requester)
                .await
                .map_err(|e| read_error("looking up requester paymail", e))?;

            return match found {
                Some(address) if address.owner_id == owner_id => Ok(address),
                _ => Err(ContactError::InvalidRequesterIdentity(format!(
                    "{} is not registered to owner {owner_id}",
                    requester.address()
                ))),
            };
        }

        let mut paymails = self
            .directory
            .paymails_for_owner(owner_id)
            .await
            .map_err(|e| read_error("listing requester paymails", e))?;

        match paymails.len() {
            0 => Err(ContactError::InvalidRequesterIdentity(format!(
                "no paymail registered to owner {owner_id}"
            ))),
            1 => Ok(paymails.remove(0)),
            _ => Err(ContactError::MultiplePaymailsRegistered(
                owner_id.to_string(),
            )),
        }
    }

    async fn load_by_key(&self, owner_id: &str, paymail: &str) -> Result<Option<Contact>> {
        self.store
            .load_by_owner_and_paymail(owner_id, paymail)
            .await
            .map_err(|e| read_error("loading contact", e))
    }

    async fn require_by_key(&self, owner_id: &str, paymail: &str) -> Result<Contact> {
        self.load_by_key(owner_id, paymail)
            .await?
            .ok_or_else(|| ContactError::ContactNotFound(paymail.to_string()))
    }

    async fn require_by_id(&self, id: &str) -> Result<Contact> {
        self.store
            .load_by_id(id)
            .await
            .map_err(|e| read_error("loading contact", e))?
            .ok_or_else(|| ContactError::ContactNotFound(id.to_string()))
    }

    /// Saves `contact` and hands it back only once the store accepted it.
    async fn save(&self, contact: Contact) -> Result<Contact> {
        match self.store.save(&contact).await {
            Ok(()) => Ok(contact),
            Err(source) => Err(save_failed(&contact, source)),
        }
    }

    /// Saves a new contact, falling back to the live record that won a
    /// concurrent create for the same key.
    async fn insert(&self, contact: Contact) -> Result<Inserted> {
        match self.store.save(&contact).await {
            Ok(()) => Ok(Inserted::Created(contact)),
            Err(source @ StoreError::Duplicate { .. }) => {
                debug!(
                    owner = contact.owner_id(),
                    paymail = contact.paymail(),
                    "Contact created concurrently, updating it instead"
                );
                match self.load_by_key(contact.owner_id(), contact.paymail()).await? {
                    Some(existing) => Ok(Inserted::Existing(existing)),
                    None => Err(save_failed(&contact, source)),
                }
            }
            Err(source) => Err(save_failed(&contact, source)),
        }
    }
}

enum Inserted {
    Created(Contact),
    Existing(Contact),
}

fn refresh_contact(
    mut contact: Contact,
    full_name: &str,
    pub_key: &str,
    metadata: Option<&Metadata>,
) -> Contact {
    contact.set_full_name(full_name);
    contact.update_pub_key(pub_key);
    if let Some(metadata) = metadata {
        contact.merge_metadata(metadata);
    }
    contact
}

fn apply_transition(mut contact: Contact, transition: Transition) -> Result<Contact> {
    contact
        .apply(transition)
        .map_err(|source: TransitionError| {
            warn!(
                owner = contact.owner_id(),
                paymail = contact.paymail(),
                error = %source,
                "Illegal contact status transition"
            );
            ContactError::IncorrectStatus {
                paymail: contact.paymail().to_string(),
                source,
            }
        })?;
    Ok(contact)
}

fn save_failed(contact: &Contact, source: StoreError) -> ContactError {
    error!(
        owner = contact.owner_id(),
        paymail = contact.paymail(),
        error = %source,
        "Saving contact failed"
    );
    ContactError::SaveContactFailed {
        owner_id: contact.owner_id().to_string(),
        paymail: contact.paymail().to_string(),
        source,
    }
}

fn read_error(context: &str, source: StoreError) -> ContactError {
    match source {
        StoreError::InvalidCondition(reason) => ContactError::InvalidCondition(reason),
        source => ContactError::Storage {
            context: context.to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::paymail::{PaymailError, PaymailResult};

    const KEY: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OWNER: &str = "owner-x";

    #[derive(Default)]
    struct StubResolver {
        fail_notify: AtomicBool,
    }

    #[async_trait]
    impl PaymailResolver for StubResolver {
        async fn fetch_public_key(&self, _paymail: &SanitizedPaymail) -> PaymailResult<String> {
            Ok(KEY.to_string())
        }

        async fn notify_contact_request(
            &self,
            paymail: &SanitizedPaymail,
            _payload: &ContactRequestPayload,
        ) -> PaymailResult<()> {
            if self.fail_notify.load(Ordering::SeqCst) {
                return Err(PaymailError::Status {
                    url: format!("https://{}/invite", paymail.domain()),
                    status: 503,
                });
            }
            Ok(())
        }
    }

    fn create_test_manager() -> (ContactManager, Arc<SqliteContactStore>, Arc<StubResolver>) {
        let store = Arc::new(SqliteContactStore::in_memory().unwrap());
        let resolver = Arc::new(StubResolver::default());
        let manager = ContactManager::with_sqlite(store.clone(), resolver.clone());
        (manager, store, resolver)
    }

    fn register(store: &SqliteContactStore, owner: &str, address: &str) {
        let pm = SanitizedPaymail::parse(address).unwrap();
        store
            .register_paymail(&PaymailAddress::new(owner, &pm, "Xavier"))
            .unwrap();
    }

    // ==================== UpsertOutcome Tests ====================

    #[test]
    fn outcome_into_result() {
        let pm = SanitizedPaymail::parse("bob@example.com").unwrap();
        let contact = Contact::new_request(OWNER, &pm, KEY, "Bob");

        let complete = UpsertOutcome::complete(contact.clone());
        assert!(!complete.is_degraded());
        assert_eq!(complete.into_result().unwrap(), contact);

        let degraded = UpsertOutcome::degraded(
            contact.clone(),
            ContactError::AddingContactRequestFailed {
                paymail: "bob@example.com".to_string(),
                source: PaymailError::Http {
                    url: "u".to_string(),
                    reason: "refused".to_string(),
                },
            },
        );
        assert!(degraded.is_degraded());
        let (kept, err) = degraded.into_parts();
        assert_eq!(kept, contact);
        assert!(matches!(
            err,
            Some(ContactError::AddingContactRequestFailed { .. })
        ));
    }

    // ==================== Requester Tests ====================

    #[tokio::test]
    async fn upsert_without_registered_paymail_fails() {
        let (manager, _, _) = create_test_manager();
        let err = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::InvalidRequesterIdentity(_)));
    }

    #[tokio::test]
    async fn upsert_with_two_paymails_needs_explicit_requester() {
        let (manager, store, _) = create_test_manager();
        register(&store, OWNER, "x@example.com");
        register(&store, OWNER, "x2@example.com");

        let err = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::MultiplePaymailsRegistered(_)));

        let outcome = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", Some("x2@example.com"), None)
            .await
            .unwrap();
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn upsert_rejects_foreign_requester() {
        let (manager, store, _) = create_test_manager();
        register(&store, OWNER, "x@example.com");
        register(&store, "someone-else", "y@example.com");

        let err = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", Some("y@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::InvalidRequesterIdentity(_)));

        let err = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", Some("not-a-paymail"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::InvalidRequesterIdentity(_)));
    }

    // ==================== Upsert Tests ====================

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let (manager, store, _) = create_test_manager();
        register(&store, OWNER, "x@example.com");

        let first = manager
            .upsert_contact(OWNER, "Bob", "Bob@Example.com", None, None)
            .await
            .unwrap()
            .into_contact();
        assert_eq!(first.status(), ContactStatus::NotConfirmed);
        assert_eq!(first.paymail(), "bob@example.com");

        let metadata = json!({"note": "from work"}).as_object().unwrap().clone();
        let second = manager
            .upsert_contact(OWNER, "Robert", "bob@example.com", None, Some(&metadata))
            .await
            .unwrap()
            .into_contact();
        assert_eq!(second.id(), first.id());
        assert_eq!(second.full_name(), "Robert");
        assert_eq!(second.metadata().get("note"), Some(&json!("from work")));
    }

    #[tokio::test]
    async fn upsert_keeps_contact_when_notification_fails() {
        let (manager, store, resolver) = create_test_manager();
        register(&store, OWNER, "x@example.com");
        resolver.fail_notify.store(true, Ordering::SeqCst);

        let outcome = manager
            .upsert_contact(OWNER, "Bob", "bob@example.com", None, None)
            .await
            .unwrap();
        assert!(outcome.is_degraded());

        let stored = manager.get_contact(OWNER, "bob@example.com").await.unwrap();
        assert_eq!(&stored, outcome.contact());
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_counterparty() {
        let (manager, store, _) = create_test_manager();
        register(&store, OWNER, "x@example.com");

        let err = manager
            .upsert_contact(OWNER, "Bob", "bob-at-example", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::InvalidAddress(_)));
    }

    // ==================== Admin Tests ====================

    #[tokio::test]
    async fn admin_cannot_target_await_accept() {
        let (manager, _, _) = create_test_manager();
        let contact = manager
            .add_contact_request(OWNER, "Bob", "bob@example.com", None)
            .await
            .unwrap();

        let err = manager
            .admin_change_status(contact.id(), ContactStatus::AwaitAccept)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContactError::IncorrectStatus {
                source: TransitionError::UnreachableTarget(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn admin_status_change_follows_transitions() {
        let (manager, _, _) = create_test_manager();
        let contact = manager
            .add_contact_request(OWNER, "Bob", "bob@example.com", None)
            .await
            .unwrap();

        let err = manager
            .admin_change_status(contact.id(), ContactStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::IncorrectStatus { .. }));

        let accepted = manager
            .admin_change_status(contact.id(), ContactStatus::NotConfirmed)
            .await
            .unwrap();
        assert_eq!(accepted.status(), ContactStatus::NotConfirmed);

        let rejected = manager
            .admin_change_status(contact.id(), ContactStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.status(), ContactStatus::Rejected);
    }

    #[tokio::test]
    async fn admin_change_on_missing_contact() {
        let (manager, _, _) = create_test_manager();
        let err = manager
            .admin_change_status("missing", ContactStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::ContactNotFound(_)));
    }

    // ==================== Query Tests ====================

    #[tokio::test]
    async fn unknown_condition_maps_to_invalid_condition() {
        let (manager, _, _) = create_test_manager();
        let err = manager
            .get_contacts_count(&ContactFilter::new().with_condition("xpub", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContactError::InvalidCondition(_)));
    }

    #[tokio::test]
    async fn owner_queries_ignore_filter_owner() {
        let (manager, _, _) = create_test_manager();
        manager
            .add_contact_request(OWNER, "Bob", "bob@example.com", None)
            .await
            .unwrap();
        manager
            .add_contact_request("other", "Bob", "bob@example.com", None)
            .await
            .unwrap();

        let count = manager
            .get_contacts_by_owner_count(OWNER, ContactFilter::for_owner("other"))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let all = manager
            .get_contacts(&ContactFilter::new(), &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("contacts.db");
        let manager = ContactManager::open(&ContactsConfig::new(&path));
        assert!(manager.is_ok());
        assert!(path.exists());
    }
}
