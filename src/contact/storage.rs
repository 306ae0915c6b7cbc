//! Contact persistence.
//!
//! [`ContactStore`] and [`PaymailDirectory`] are the storage seams the
//! manager depends on. [`SqliteContactStore`] implements both on a single
//! `SQLite` connection.
//!
//! Uniqueness of a live relationship is enforced here, not in the manager:
//! a partial unique index on `(owner_id, paymail)` covers every row whose
//! `deleted_at` is `NULL`, and inserting a second live row for the pair
//! fails with [`StoreError::Duplicate`]. Soft-deleted rows stay in the
//! table but are invisible to every read, and a save never brings one back.
//!
//! The async methods run their queries on tokio's blocking pool. A save
//! handed to the pool completes even if the calling future is dropped.

// SQLite operations need to hold the lock for the duration of the operation.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{StoreError, StoreResult};
use super::types::{Contact, ContactParts, ContactStatus, Metadata, PaymailAddress};
use crate::paymail::SanitizedPaymail;

/// Default number of contacts per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

const CONTACT_COLUMNS: &str =
    "id, owner_id, paymail, pub_key, full_name, status, metadata, created_at, updated_at, deleted_at";

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

impl SortDirection {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Pagination and ordering for list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// 1-based page number.
    pub page: u32,
    /// Contacts per page (clamped to [`MAX_PAGE_SIZE`]).
    pub page_size: u32,
    /// Field to order by.
    pub order_by: String,
    /// Sort order.
    pub sort_direction: SortDirection,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: "created_at".to_string(),
            sort_direction: SortDirection::Desc,
        }
    }
}

impl QueryParams {
    /// Creates params for the given page with default ordering.
    #[must_use]
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    /// Sets the ordering.
    #[must_use]
    pub fn ordered_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = field.into();
        self.sort_direction = direction;
        self
    }

    fn limit(&self) -> i64 {
        match self.page_size {
            0 => i64::from(DEFAULT_PAGE_SIZE),
            n => i64::from(n.min(MAX_PAGE_SIZE)),
        }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }
}

/// Equality filters for list and count queries.
///
/// `conditions` match contact fields (`id`, `owner_id`, `full_name`,
/// `paymail`, `pub_key`, `status`); `metadata` matches keys inside the
/// metadata document. A `null` value matches a missing field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactFilter {
    /// Restrict to one owner.
    pub owner_id: Option<String>,
    /// Metadata key/value pairs that must all match.
    pub metadata: Metadata,
    /// Field/value pairs that must all match.
    pub conditions: Map<String, Value>,
}

impl ContactFilter {
    /// A filter matching every live contact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter matching one owner's live contacts.
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    /// Adds a field condition.
    #[must_use]
    pub fn with_condition(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    /// Adds a metadata condition.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Persistence for contact records.
///
/// Reads never return soft-deleted contacts.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Loads the live contact for an owner and counterparty paymail.
    async fn load_by_owner_and_paymail(
        &self,
        owner_id: &str,
        paymail: &str,
    ) -> StoreResult<Option<Contact>>;

    /// Loads a live contact by id.
    async fn load_by_id(&self, id: &str) -> StoreResult<Option<Contact>>;

    /// Inserts or updates a contact by id.
    ///
    /// Must fail with [`StoreError::Duplicate`] when inserting a second live
    /// contact for the same owner and paymail, and with
    /// [`StoreError::Deleted`] when the stored contact with this id has
    /// already been soft-deleted. Deletion is final.
    async fn save(&self, contact: &Contact) -> StoreResult<()>;

    /// Lists live contacts matching `filter`.
    async fn list(&self, filter: &ContactFilter, params: &QueryParams)
        -> StoreResult<Vec<Contact>>;

    /// Counts live contacts matching `filter`.
    async fn count(&self, filter: &ContactFilter) -> StoreResult<u64>;
}

/// Lookup of the paymail addresses registered to wallets.
#[async_trait]
pub trait PaymailDirectory: Send + Sync {
    /// All live paymails of an owner.
    async fn paymails_for_owner(&self, owner_id: &str) -> StoreResult<Vec<PaymailAddress>>;

    /// A live paymail by address, whoever owns it.
    async fn paymail_by_address(
        &self,
        paymail: &SanitizedPaymail,
    ) -> StoreResult<Option<PaymailAddress>>;
}

/// `SQLite`-based storage for contacts and registered paymails.
pub struct SqliteContactStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContactStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Runs `op` against the connection on the blocking thread pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Storage(format!("Storage task failed: {e}")))?
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                paymail TEXT NOT NULL,
                pub_key TEXT NOT NULL,
                full_name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            );

            -- One live relationship per owner and counterparty
            CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_owner_paymail_live
                ON contacts (owner_id, paymail)
                WHERE deleted_at IS NULL;

            CREATE TABLE IF NOT EXISTS paymail_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                alias TEXT NOT NULL,
                domain TEXT NOT NULL,
                public_name TEXT NOT NULL DEFAULT '',
                avatar TEXT,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_paymail_addresses_live
                ON paymail_addresses (alias, domain)
                WHERE deleted_at IS NULL;

            CREATE INDEX IF NOT EXISTS idx_paymail_addresses_owner
                ON paymail_addresses (owner_id);
            ",
        )?;

        Ok(())
    }

    // ==================== Paymail Directory ====================

    /// Registers a paymail address for its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is already registered or the
    /// database operation fails.
    pub fn register_paymail(&self, paymail: &PaymailAddress) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r"
            INSERT INTO paymail_addresses (owner_id, alias, domain, public_name, avatar, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                &paymail.owner_id,
                &paymail.alias,
                &paymail.domain,
                &paymail.public_name,
                &paymail.avatar,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        Ok(())
    }

    /// Soft-deletes a registered paymail address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_paymail(&self, paymail: &SanitizedPaymail) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r"
            UPDATE paymail_addresses SET deleted_at = ?1
            WHERE alias = ?2 AND domain = ?3 AND deleted_at IS NULL
            ",
            params![
                chrono::Utc::now().timestamp(),
                paymail.alias(),
                paymail.domain()
            ],
        )?;

        Ok(())
    }
}

#[async_trait]
impl ContactStore for SqliteContactStore {
    async fn load_by_owner_and_paymail(
        &self,
        owner_id: &str,
        paymail: &str,
    ) -> StoreResult<Option<Contact>> {
        let values = vec![owner_id.to_string(), paymail.to_string()];
        self.run(move |conn| load_one(conn, "owner_id = ?1 AND paymail = ?2", &values))
            .await
    }

    async fn load_by_id(&self, id: &str) -> StoreResult<Option<Contact>> {
        let values = vec![id.to_string()];
        self.run(move |conn| load_one(conn, "id = ?1", &values))
            .await
    }

    async fn save(&self, contact: &Contact) -> StoreResult<()> {
        let contact = contact.clone();
        self.run(move |conn| save_contact(conn, &contact)).await
    }

    async fn list(
        &self,
        filter: &ContactFilter,
        params: &QueryParams,
    ) -> StoreResult<Vec<Contact>> {
        let filter = filter.clone();
        let params = params.clone();
        self.run(move |conn| list_contacts(conn, &filter, &params))
            .await
    }

    async fn count(&self, filter: &ContactFilter) -> StoreResult<u64> {
        let filter = filter.clone();
        self.run(move |conn| count_contacts(conn, &filter)).await
    }
}

#[async_trait]
impl PaymailDirectory for SqliteContactStore {
    async fn paymails_for_owner(&self, owner_id: &str) -> StoreResult<Vec<PaymailAddress>> {
        let values = vec![owner_id.to_string()];
        self.run(move |conn| {
            query_paymails(
                conn,
                r"
                SELECT owner_id, alias, domain, public_name, avatar
                FROM paymail_addresses
                WHERE owner_id = ?1 AND deleted_at IS NULL
                ORDER BY created_at, id
                ",
                &values,
            )
        })
        .await
    }

    async fn paymail_by_address(
        &self,
        paymail: &SanitizedPaymail,
    ) -> StoreResult<Option<PaymailAddress>> {
        let values = vec![paymail.alias().to_string(), paymail.domain().to_string()];
        let mut found = self
            .run(move |conn| {
                query_paymails(
                    conn,
                    r"
                    SELECT owner_id, alias, domain, public_name, avatar
                    FROM paymail_addresses
                    WHERE alias = ?1 AND domain = ?2 AND deleted_at IS NULL
                    ",
                    &values,
                )
            })
            .await?;
        Ok(found.pop())
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Storage(format!("Failed to acquire database lock: {e}")))
}

// ==================== Queries ====================

fn query_paymails(
    conn: &Connection,
    sql: &str,
    values: &[String],
) -> StoreResult<Vec<PaymailAddress>> {
    let mut stmt = conn.prepare(sql)?;

    let paymails = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(PaymailAddress {
                owner_id: row.get(0)?,
                alias: row.get(1)?,
                domain: row.get(2)?,
                public_name: row.get(3)?,
                avatar: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(paymails)
}

fn load_one(
    conn: &Connection,
    where_clause: &str,
    values: &[String],
) -> StoreResult<Option<Contact>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {where_clause} AND deleted_at IS NULL"
            ),
            params_from_iter(values.iter()),
            RawContact::from_row,
        )
        .optional()?;

    raw.map(RawContact::into_contact).transpose()
}

fn save_contact(conn: &Connection, contact: &Contact) -> StoreResult<()> {
    let metadata_json = serde_json::to_string(contact.metadata())
        .map_err(|e| StoreError::InvalidData(format!("Failed to serialize metadata: {e}")))?;

    // The conflict branch only touches live rows; a soft-deleted row stays deleted.
    let result = conn.execute(
        r"
        INSERT INTO contacts (id, owner_id, paymail, pub_key, full_name, status, metadata, created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            pub_key = excluded.pub_key,
            full_name = excluded.full_name,
            status = excluded.status,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at,
            deleted_at = excluded.deleted_at
        WHERE contacts.deleted_at IS NULL
        ",
        params![
            contact.id(),
            contact.owner_id(),
            contact.paymail(),
            contact.pub_key(),
            contact.full_name(),
            contact.status().as_str(),
            &metadata_json,
            contact.created_at(),
            contact.updated_at(),
            contact.deleted_at(),
        ],
    );

    match result {
        Ok(0) => Err(StoreError::Deleted(contact.id().to_string())),
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate {
            owner_id: contact.owner_id().to_string(),
            paymail: contact.paymail().to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn list_contacts(
    conn: &Connection,
    filter: &ContactFilter,
    params: &QueryParams,
) -> StoreResult<Vec<Contact>> {
    let (where_clause, mut values) = build_where(filter)?;
    let order_column = order_column(&params.order_by)?;

    values.push(SqlValue::Integer(params.limit()));
    values.push(SqlValue::Integer(params.offset()));

    let sql = format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {where_clause} ORDER BY {order_column} {}, id ASC LIMIT ? OFFSET ?",
        params.sort_direction.as_sql()
    );

    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(params_from_iter(values.iter()), RawContact::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(RawContact::into_contact).collect()
}

fn count_contacts(conn: &Connection, filter: &ContactFilter) -> StoreResult<u64> {
    let (where_clause, values) = build_where(filter)?;
    let sql = format!("SELECT COUNT(*) FROM contacts WHERE {where_clause}");

    let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;

    u64::try_from(count).map_err(|e| StoreError::InvalidData(format!("Invalid count: {e}")))
}

/// A contact row before status and metadata are decoded.
struct RawContact {
    id: String,
    owner_id: String,
    paymail: String,
    pub_key: String,
    full_name: String,
    status: String,
    metadata: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl RawContact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            paymail: row.get(2)?,
            pub_key: row.get(3)?,
            full_name: row.get(4)?,
            status: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }

    fn into_contact(self) -> StoreResult<Contact> {
        let status = ContactStatus::parse(&self.status)
            .ok_or_else(|| StoreError::InvalidData(format!("Invalid status: {}", self.status)))?;

        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::InvalidData(format!("Invalid metadata JSON: {e}")))?;

        Ok(Contact::restore(ContactParts {
            id: self.id,
            owner_id: self.owner_id,
            paymail: self.paymail,
            pub_key: self.pub_key,
            full_name: self.full_name,
            status,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn condition_column(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("id"),
        "owner_id" => Some("owner_id"),
        "full_name" => Some("full_name"),
        "paymail" => Some("paymail"),
        "pub_key" => Some("pub_key"),
        "status" => Some("status"),
        _ => None,
    }
}

fn order_column(field: &str) -> StoreResult<&'static str> {
    match field {
        "created_at" => Ok("created_at"),
        "updated_at" => Ok("updated_at"),
        "full_name" => Ok("full_name"),
        "paymail" => Ok("paymail"),
        "status" => Ok("status"),
        "id" => Ok("id"),
        other => Err(StoreError::InvalidCondition(format!(
            "cannot order by {other}"
        ))),
    }
}

fn json_to_sql(value: &Value) -> StoreResult<Option<SqlValue>> {
    let sql = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) if !n.is_u64() => SqlValue::Real(f),
            _ => {
                return Err(StoreError::InvalidCondition(format!(
                    "number {n} is out of range"
                )))
            }
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    };
    Ok(Some(sql))
}

fn build_where(filter: &ContactFilter) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut values = Vec::new();

    if let Some(owner_id) = &filter.owner_id {
        clauses.push("owner_id = ?".to_string());
        values.push(SqlValue::Text(owner_id.clone()));
    }

    for (field, value) in &filter.conditions {
        let column = condition_column(field)
            .ok_or_else(|| StoreError::InvalidCondition(format!("unknown field {field}")))?;
        match json_to_sql(value)? {
            Some(v) => {
                clauses.push(format!("{column} = ?"));
                values.push(v);
            }
            None => clauses.push(format!("{column} IS NULL")),
        }
    }

    for (key, value) in &filter.metadata {
        if key.contains('"') {
            return Err(StoreError::InvalidCondition(format!(
                "invalid metadata key {key}"
            )));
        }
        values.push(SqlValue::Text(format!("$.\"{key}\"")));
        match json_to_sql(value)? {
            Some(v) => {
                clauses.push("json_extract(metadata, ?) = ?".to_string());
                values.push(v);
            }
            None => clauses.push("json_extract(metadata, ?) IS NULL".to_string()),
        }
    }

    Ok((clauses.join(" AND "), values))
}
