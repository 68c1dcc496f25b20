// SQLite-backed snapshot storage

use crate::storage::{Storage, validate_key};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Snapshots kept as rows of a single key-value table
pub struct SqliteStorage {
    db: Connection,
}

impl SqliteStorage {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }

        let db = Connection::open(path).context("Failed to open SQLite database")?;
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Get a reference to the SQLite database connection
    pub fn db(&self) -> &Connection {
        &self.db
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating snapshot schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// All keys currently stored
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.db.prepare("SELECT key FROM snapshots ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Last write time of a key in milliseconds since epoch
    pub fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        let ts = self
            .db
            .query_row("SELECT updated_at FROM snapshots WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(ts)
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .db
            .query_row("SELECT data_json FROM snapshots WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .context("Failed to read snapshot")?;
        Ok(data)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        self.db
            .execute(
                "INSERT OR REPLACE INTO snapshots (key, data_json, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
            )
            .context("Failed to write snapshot")?;

        debug!(key, bytes = value.len(), "SqliteStorage::set: wrote snapshot");
        Ok(())
    }
}
