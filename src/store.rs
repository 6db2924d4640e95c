//! Transaction store.
//!
//! One table of transaction records keyed by hash. Writes are upserts: the
//! last write for a hash wins. Each call is a single statement; there are no
//! transactions spanning several calls.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    hash TEXT PRIMARY KEY,
    from_addr TEXT,
    to_addr TEXT,
    value TEXT,
    time INTEGER,
    raw_json TEXT,
    parsed_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_transactions_time ON transactions (time DESC);
";

/// A persisted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    #[serde(default)]
    pub from_addr: String,
    #[serde(default)]
    pub to_addr: String,
    /// Wei amount as a base-10 string.
    #[serde(default)]
    pub value: String,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub time: i64,
    /// The upstream object, serialized.
    #[serde(default)]
    pub raw_json: String,
    /// Annotation for this transaction, serialized, or empty.
    #[serde(default)]
    pub parsed_json: String,
}

pub trait TransactionStore: Send + Sync {
    fn name(&self) -> &'static str;
    /// Create the table if needed. Safe to call repeatedly.
    fn initialize(&self) -> Result<()>;
    /// Insert or replace by hash.
    fn upsert(&self, record: &TransactionRecord) -> Result<()>;
    /// Up to `limit` records, newest `time` first.
    fn list_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>>;
    fn count(&self) -> Result<u64>;
    fn get(&self, hash: &str) -> Result<Option<TransactionRecord>>;
}

/// Run `f` against `store` on the blocking pool, off the async workers.
pub async fn blocking<T, F>(store: &Arc<dyn TransactionStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn TransactionStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| Error::Storage(format!("store task failed: {e}")))?
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.initialize()?;
        tracing::debug!("opened transaction store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".into()))?;
        Ok(f(&conn)?)
    }
}

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        hash: r.get(0)?,
        from_addr: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        to_addr: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
        value: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        time: r.get::<_, Option<i64>>(4)?.unwrap_or_default(),
        raw_json: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
        parsed_json: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

impl TransactionStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA))
    }

    fn upsert(&self, record: &TransactionRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO transactions
                (hash, from_addr, to_addr, value, time, raw_json, parsed_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.hash,
                    record.from_addr,
                    record.to_addr,
                    record.value,
                    record.time,
                    record.raw_json,
                    record.parsed_json,
                ],
            )
        })?;
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hash, from_addr, to_addr, value, time, raw_json, parsed_json
                FROM transactions
                ORDER BY time DESC
                LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_record)?;
            let records = rows.collect::<rusqlite::Result<Vec<_>>>();
            records
        })
    }

    fn count(&self) -> Result<u64> {
        let n: i64 = self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        })?;
        Ok(n.max(0) as u64)
    }

    fn get(&self, hash: &str) -> Result<Option<TransactionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT hash, from_addr, to_addr, value, time, raw_json, parsed_json
                FROM transactions WHERE hash = ?1",
                params![hash],
                row_to_record,
            )
            .optional()
        })
    }
}
