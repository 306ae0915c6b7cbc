//! Reusable test helpers for contact manager integration tests.
//!
//! [`MockResolver`] stands in for the paymail network and records what it
//! was asked. [`CountingStore`] wraps a real in-memory `SQLite` store so
//! tests can count writes and inject save failures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use paymail_contacts::contact::{
    Contact, ContactFilter, ContactStore, PaymailAddress, QueryParams, SqliteContactStore,
    StoreError, StoreResult,
};
use paymail_contacts::paymail::{
    ContactRequestPayload, PaymailError, PaymailResolver, PaymailResult, SanitizedPaymail,
};
use paymail_contacts::ContactManager;

pub const OWNER_X: &str = "owner-x";
pub const KEY_K: &str = "02a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
pub const KEY_K2: &str = "03ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100";

/// Atomic counter for unique test directory names.
static HELPER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Creates a unique temporary directory for test isolation.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let id = HELPER_COUNTER.fetch_add(1, Ordering::SeqCst);
    env::temp_dir().join(format!(
        "paymail_contacts_test_{}_{}_{}",
        prefix,
        std::process::id(),
        id
    ))
}

/// Removes a temporary test directory. Ignores errors silently.
pub fn cleanup_dir(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

/// Resolver double with per-address keys and failure switches.
#[derive(Default)]
pub struct MockResolver {
    keys: Mutex<HashMap<String, String>>,
    pub fail_pki: AtomicBool,
    pub fail_notify: AtomicBool,
    pub pki_delay: Mutex<Option<Duration>>,
    pub pki_calls: AtomicUsize,
    pub notifications: Mutex<Vec<(String, ContactRequestPayload)>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key returned for `address`. Unknown addresses get [`KEY_K`].
    pub fn set_key(&self, address: &str, key: &str) {
        self.keys
            .lock()
            .unwrap()
            .insert(address.to_string(), key.to_string());
    }

    pub fn set_pki_delay(&self, delay: Duration) {
        *self.pki_delay.lock().unwrap() = Some(delay);
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn last_notification(&self) -> Option<(String, ContactRequestPayload)> {
        self.notifications.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymailResolver for MockResolver {
    async fn fetch_public_key(&self, paymail: &SanitizedPaymail) -> PaymailResult<String> {
        self.pki_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.pki_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_pki.load(Ordering::SeqCst) {
            return Err(PaymailError::Status {
                url: format!("https://{}/api/v1/bsvalias/id", paymail.domain()),
                status: 500,
            });
        }

        let keys = self.keys.lock().unwrap();
        Ok(keys
            .get(paymail.address())
            .cloned()
            .unwrap_or_else(|| KEY_K.to_string()))
    }

    async fn notify_contact_request(
        &self,
        paymail: &SanitizedPaymail,
        payload: &ContactRequestPayload,
    ) -> PaymailResult<()> {
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(PaymailError::Http {
                url: format!("https://{}/api/v1/pike/invite", paymail.domain()),
                reason: "connection refused".to_string(),
            });
        }

        self.notifications
            .lock()
            .unwrap()
            .push((paymail.address().to_string(), payload.clone()));
        Ok(())
    }
}

/// Store wrapper that counts saves and can be told to fail them.
pub struct CountingStore {
    pub inner: Arc<SqliteContactStore>,
    pub saves: AtomicUsize,
    pub fail_saves: AtomicBool,
    /// Makes the next key lookup miss, as if another create had not landed yet.
    pub hide_next_load: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: Arc<SqliteContactStore>) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            hide_next_load: AtomicBool::new(false),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactStore for CountingStore {
    async fn load_by_owner_and_paymail(
        &self,
        owner_id: &str,
        paymail: &str,
    ) -> StoreResult<Option<Contact>> {
        if self.hide_next_load.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.load_by_owner_and_paymail(owner_id, paymail).await
    }

    async fn load_by_id(&self, id: &str) -> StoreResult<Option<Contact>> {
        self.inner.load_by_id(id).await
    }

    async fn save(&self, contact: &Contact) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("disk full".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(contact).await
    }

    async fn list(
        &self,
        filter: &ContactFilter,
        params: &QueryParams,
    ) -> StoreResult<Vec<Contact>> {
        self.inner.list(filter, params).await
    }

    async fn count(&self, filter: &ContactFilter) -> StoreResult<u64> {
        self.inner.count(filter).await
    }
}

/// A manager wired to doubles, plus handles on them.
pub struct TestContext {
    pub manager: ContactManager,
    pub store: Arc<CountingStore>,
    pub sqlite: Arc<SqliteContactStore>,
    pub resolver: Arc<MockResolver>,
}

impl TestContext {
    pub fn new() -> Self {
        let sqlite = Arc::new(SqliteContactStore::in_memory().unwrap());
        let store = Arc::new(CountingStore::new(sqlite.clone()));
        let resolver = Arc::new(MockResolver::new());
        let manager = ContactManager::new(store.clone(), sqlite.clone(), resolver.clone());

        Self {
            manager,
            store,
            sqlite,
            resolver,
        }
    }

    /// Creates a context where [`OWNER_X`] owns `x@example.com`.
    pub fn with_owner_x() -> Self {
        let ctx = Self::new();
        ctx.register(OWNER_X, "x@example.com", "Xavier");
        ctx
    }

    pub fn register(&self, owner_id: &str, address: &str, public_name: &str) {
        let paymail = SanitizedPaymail::parse(address).unwrap();
        self.sqlite
            .register_paymail(&PaymailAddress::new(owner_id, &paymail, public_name))
            .unwrap();
    }
}
