use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {required} bytes required, {capacity} available")]
    QuotaExceeded { required: usize, capacity: usize },
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Size-constrained key/value persistence.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }
}

pub struct Database {
    conn: Connection,
    quota_bytes: usize,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SqlResult<Self> {
        let mut db = Database {
            conn,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_kv_store.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/001_create_kv_store.sql")),
            ),
            (
                "002_create_settings.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/002_create_settings.sql")),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    /// Bytes held by every key except `key`.
    fn used_bytes_excluding(&self, key: &str) -> SqlResult<usize> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_store WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }

    pub fn remove(&self, key: &str) -> SqlResult<()> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
        let value = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let required = self.used_bytes_excluding(key)? + key.len() + value.len();
        if required > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                required,
                capacity: self.quota_bytes,
            });
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }
}
