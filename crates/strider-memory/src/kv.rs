//! Key-value store.
//!
//! A single table holds every persisted client setting:
//!
//! | column     | type | description                     |
//! |------------|------|---------------------------------|
//! | key        | TEXT | primary key                     |
//! | value      | TEXT | JSON-encoded value              |
//! | updated_at | TEXT | RFC-3339 time of the last write |
//!
//! # Example
//!
//! ```rust
//! use strider_memory::kv::KeyValueStore;
//!
//! let store = KeyValueStore::open_in_memory().unwrap();
//! store.set("heading_offset_rad", &0.25_f64).unwrap();
//! assert_eq!(store.get::<f64>("heading_offset_rad").unwrap(), Some(0.25));
//! ```

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use strider_types::StriderError;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Value encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot create {0}: {1}")]
    Path(String, std::io::Error),
}

impl From<StoreError> for StriderError {
    fn from(e: StoreError) -> Self {
        StriderError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// KeyValueStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct KeyValueStore {
    conn: Connection,
}

impl KeyValueStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Path(parent.display().to_string(), e))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT NOT NULL PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete `key`.  Returns `true` if it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none() {
        let store = KeyValueStore::open_in_memory().unwrap();
        assert_eq!(store.get::<f64>("nope").unwrap(), None);
    }

    #[test]
    fn set_overwrites() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.set("k", "first").unwrap();
        store.set("k", "second").unwrap();
        assert_eq!(store.get::<String>("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn remove_reports_presence() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.set("k", &1).unwrap();
        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
        assert_eq!(store.get::<i32>("k").unwrap(), None);
    }

    #[test]
    fn wrong_type_is_a_json_error() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.set("k", "text").unwrap();
        assert!(matches!(store.get::<f64>("k"), Err(StoreError::Json(_))));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = KeyValueStore::open(&path).unwrap();
            store.set("offset", &-1.25_f64).unwrap();
        }
        let store = KeyValueStore::open(&path).unwrap();
        assert_eq!(store.get::<f64>("offset").unwrap(), Some(-1.25));
    }
}
