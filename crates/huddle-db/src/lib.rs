pub mod blobs;
pub mod log_store;
pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use rusqlite::Connection;
use tracing::{info, warn};

pub use blobs::BlobStore;
pub use log_store::LogStore;
pub use models::MessageRow;

/// Persistence adapter for chat messages.
///
/// Implementations are blocking; async callers run them on the blocking
/// pool. `recent_messages` returns rows oldest first.
pub trait MessageStore: Send + Sync {
    fn backend(&self) -> &'static str;

    fn insert_message(&self, row: &MessageRow) -> Result<()>;

    /// Replace the reactions snapshot. Returns false if the id is unknown.
    fn update_reactions(&self, id: &str, reactions: &str) -> Result<bool>;

    fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>>;

    fn get_message(&self, id: &str) -> Result<Option<MessageRow>>;

    /// Delete every row with `created_at < cutoff_ms` and return them,
    /// together with any rows the store evicted on its own since the last
    /// call.
    fn delete_older_than(&self, cutoff_ms: i64) -> Result<Vec<MessageRow>>;
}

/// SQLite row store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Log,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sql" => Ok(Self::Sqlite),
            "log" | "json" | "jsonl" => Ok(Self::Log),
            other => bail!("unknown store backend '{}'", other),
        }
    }
}

/// Open the configured backend. A SQLite store that fails to open falls back
/// to the append-only log so the chat can still start.
pub fn open_store(
    backend: StoreBackend,
    db_path: &Path,
    log_path: &Path,
    log_max_records: usize,
) -> Result<Arc<dyn MessageStore>> {
    match backend {
        StoreBackend::Sqlite => match Database::open(db_path) {
            Ok(db) => Ok(Arc::new(db)),
            Err(e) => {
                warn!(
                    "SQLite unavailable at {} ({}), falling back to log store",
                    db_path.display(),
                    e
                );
                Ok(Arc::new(LogStore::open(log_path, log_max_records)?))
            }
        },
        StoreBackend::Log => Ok(Arc::new(LogStore::open(log_path, log_max_records)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("sqlite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert_eq!(" JSON ".parse::<StoreBackend>().unwrap(), StoreBackend::Log);
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_open_store_falls_back_to_log() {
        let dir = tempfile::tempdir().unwrap();
        // SQLite does not create missing parent directories
        let store = open_store(
            StoreBackend::Sqlite,
            &dir.path().join("missing").join("huddle.db"),
            &dir.path().join("messages.jsonl"),
            1000,
        )
        .unwrap();
        assert_eq!(store.backend(), "log");
    }
}
