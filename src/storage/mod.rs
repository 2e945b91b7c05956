//! Durable key-value storage for state that must survive restarts (the session blob).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::erp::{ErpError, ErpResult};

/// Trait for durable key-value backends.
pub trait KeyValueStore: Send + Sync {
  /// Read the value stored under `key`.
  fn get(&self, key: &str) -> ErpResult<Option<String>>;

  /// Insert or replace the value stored under `key`.
  fn set(&self, key: &str, value: &str) -> ErpResult<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> ErpResult<()>;
}

/// In-process store. Nothing survives the process; stands in when the state database is unavailable.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> ErpResult<Option<String>> {
    let values = self.values.lock().map_err(lock_poisoned)?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> ErpResult<()> {
    let mut values = self.values.lock().map_err(lock_poisoned)?;
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> ErpResult<()> {
    let mut values = self.values.lock().map_err(lock_poisoned)?;
    values.remove(key);
    Ok(())
  }
}

/// SQLite-backed key-value store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> ErpResult<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> ErpResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| ErpError::Storage(format!("Failed to create state directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ErpError::Storage(format!(
        "Failed to open state database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> ErpResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ErpError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("ess").join("state.db"))
  }

  fn run_migrations(&self) -> ErpResult<()> {
    let conn = self.conn.lock().map_err(lock_poisoned)?;

    conn
      .execute_batch(STATE_SCHEMA)
      .map_err(|e| ErpError::Storage(format!("Failed to run state migrations: {}", e)))?;

    Ok(())
  }
}

const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

impl KeyValueStore for SqliteStore {
  fn get(&self, key: &str) -> ErpResult<Option<String>> {
    let conn = self.conn.lock().map_err(lock_poisoned)?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| ErpError::Storage(format!("Failed to read {}: {}", key, e)))
  }

  fn set(&self, key: &str, value: &str) -> ErpResult<()> {
    let conn = self.conn.lock().map_err(lock_poisoned)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
        params![key, value, Utc::now().to_rfc3339()],
      )
      .map_err(|e| ErpError::Storage(format!("Failed to store {}: {}", key, e)))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> ErpResult<()> {
    let conn = self.conn.lock().map_err(lock_poisoned)?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| ErpError::Storage(format!("Failed to remove {}: {}", key, e)))?;

    Ok(())
  }
}

fn lock_poisoned<T>(e: std::sync::PoisonError<T>) -> ErpError {
  ErpError::Storage(format!("Lock poisoned: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sqlite_store_round_trips_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.db");

    {
      let store = SqliteStore::open_at(&path).unwrap();
      assert_eq!(store.get("erp_session").unwrap(), None);
      store.set("erp_session", "first").unwrap();
      store.set("erp_session", "second").unwrap();
    }

    let reopened = SqliteStore::open_at(&path).unwrap();
    assert_eq!(
      reopened.get("erp_session").unwrap().as_deref(),
      Some("second")
    );

    reopened.remove("erp_session").unwrap();
    reopened.remove("erp_session").unwrap();
    assert_eq!(reopened.get("erp_session").unwrap(), None);
  }

  #[test]
  fn memory_store_basic_operations() {
    let store = MemoryStore::new();
    store.set("a", "1").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    store.remove("a").unwrap();
    assert!(store.get("a").unwrap().is_none());
  }
}
