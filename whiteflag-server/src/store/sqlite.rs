//! SQLite implementation of [`RecordStore`].
//!
//! Records are stored as JSON documents keyed by id, with the tribe key
//! broken out into its own column for ad hoc querying. Durability comes
//! from SQLite's WAL journal; the engine itself never retries.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track schema
//! versions. When the schema changes, increment `SCHEMA_VERSION` and add a
//! migration step in `run_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use whiteflag_core::{Claim, ClaimId, Request, RequestId};

use super::{RecordStore, StoreError};

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed record store.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`.
/// Every trait method moves the work onto `spawn_blocking` so the async
/// runtime is never blocked on disk I/O.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database file at the given path.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;
        Self::from_connection(conn)
    }

    /// In-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::storage("open in-memory database", e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the schema and run any pending migrations, tracked via
    /// the `user_version` pragma.
    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::storage(
                "init schema",
                format!(
                    "database schema version {} is newer than supported version {}",
                    current_version, SCHEMA_VERSION
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }
        Ok(())
    }

    /// Migration v0 -> v1: the two record tables.
    fn migrate_v0_to_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                tribe_key TEXT NOT NULL,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_tribe_key
            ON requests(tribe_key);

            CREATE TABLE IF NOT EXISTS claims (
                id TEXT PRIMARY KEY,
                bounty_request_id TEXT NOT NULL,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_claims_bounty_request
            ON claims(bounty_request_id);
            "#,
        )
        .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        Ok(())
    }
}

fn decode_request(json: String) -> Result<Request, StoreError> {
    serde_json::from_str(&json)
        .map_err(|e| StoreError::storage("decode request", e.to_string()))
}

fn decode_claim(json: String) -> Result<Claim, StoreError> {
    serde_json::from_str(&json).map_err(|e| StoreError::storage("decode claim", e.to_string()))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let json: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            conn.query_row("SELECT record FROM requests WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
        .map_err(|e| StoreError::storage("get_request join", e.to_string()))?
        .map_err(|e| StoreError::storage("get_request", e.to_string()))?;

        json.map(decode_request).transpose()
    }

    async fn put_request(&self, request: &Request) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let id = request.id.to_string();
        let tribe_key = request.tribe_key.as_str().to_string();
        let json = serde_json::to_string(request)
            .map_err(|e| StoreError::storage("encode request", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            conn.execute(
                "INSERT INTO requests (id, tribe_key, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET tribe_key = ?2, record = ?3",
                params![id, tribe_key, json],
            )
        })
        .await
        .map_err(|e| StoreError::storage("put_request join", e.to_string()))?
        .map_err(|e| StoreError::storage("put_request", e.to_string()))?;

        Ok(())
    }

    async fn get_all_requests(&self) -> Result<Vec<Request>, StoreError> {
        let conn = self.conn.clone();
        let rows: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            let mut stmt = conn.prepare("SELECT record FROM requests")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| StoreError::storage("get_all_requests join", e.to_string()))?
        .map_err(|e| StoreError::storage("get_all_requests", e.to_string()))?;

        rows.into_iter().map(decode_request).collect()
    }

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let json: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            conn.query_row("SELECT record FROM claims WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
        .map_err(|e| StoreError::storage("get_claim join", e.to_string()))?
        .map_err(|e| StoreError::storage("get_claim", e.to_string()))?;

        json.map(decode_claim).transpose()
    }

    async fn put_claim(&self, claim: &Claim) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let id = claim.id.to_string();
        let bounty_request_id = claim.bounty_request_id.to_string();
        let json = serde_json::to_string(claim)
            .map_err(|e| StoreError::storage("encode claim", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            conn.execute(
                "INSERT INTO claims (id, bounty_request_id, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET bounty_request_id = ?2, record = ?3",
                params![id, bounty_request_id, json],
            )
        })
        .await
        .map_err(|e| StoreError::storage("put_claim join", e.to_string()))?
        .map_err(|e| StoreError::storage("put_claim", e.to_string()))?;

        Ok(())
    }

    async fn get_all_claims(&self) -> Result<Vec<Claim>, StoreError> {
        let conn = self.conn.clone();
        let rows: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex poisoned");
            let mut stmt = conn.prepare("SELECT record FROM claims")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| StoreError::storage("get_all_claims join", e.to_string()))?
        .map_err(|e| StoreError::storage("get_all_claims", e.to_string()))?;

        rows.into_iter().map(decode_claim).collect()
    }
}
