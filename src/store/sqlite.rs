//! SQLite-backed key-value store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use super::{KeyValueStore, StoreError};

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-based store. A single connection is shared behind a mutex; the
/// store assumes one writing process.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  /// Upper bound on the total size of stored values, in bytes
  quota: Option<usize>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default data location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn)
  }

  /// Limit the total size of stored values.
  pub fn with_quota(mut self, bytes: usize) -> Self {
    self.quota = Some(bytes);
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storesync").join("store.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota: None,
    })
  }

  fn check_quota(&self, conn: &Connection, key: &str, incoming: usize) -> Result<(), StoreError> {
    let Some(limit) = self.quota else {
      return Ok(());
    };

    let others: i64 = conn.query_row(
      "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM kv WHERE key != ?",
      params![key],
      |row| row.get(0),
    )?;

    let size = others.max(0) as usize + incoming;
    if size > limit {
      return Err(StoreError::QuotaExceeded {
        key: key.to_string(),
        size,
        limit,
      });
    }
    Ok(())
  }
}

impl KeyValueStore for SqliteStore {
  fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    self.check_quota(&conn, key, bytes.len())?;

    conn.execute(
      "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, bytes],
    )?;
    Ok(())
  }

  fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
    let conn = match self.conn.lock() {
      Ok(conn) => conn,
      Err(_) => {
        warn!(key, "Store lock poisoned");
        return None;
      }
    };

    let result = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get::<_, Vec<u8>>(0)
      })
      .optional();

    match result {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "Failed to read from store");
        None
      }
    }
  }

  fn delete(&self, key: &str) {
    let Ok(conn) = self.conn.lock() else {
      warn!(key, "Store lock poisoned");
      return;
    };
    if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?", params![key]) {
      warn!(key, error = %e, "Failed to delete from store");
    }
  }

  fn keys(&self, prefix: &str) -> Vec<String> {
    let Ok(conn) = self.conn.lock() else {
      warn!(prefix, "Store lock poisoned");
      return Vec::new();
    };

    // substr() avoids LIKE wildcard escaping for prefixes containing '_' or '%'
    let result = conn
      .prepare("SELECT key FROM kv WHERE substr(key, 1, ?1) = ?2 ORDER BY key")
      .and_then(|mut stmt| {
        let keys = stmt
          .query_map(params![prefix.chars().count() as i64, prefix], |row| {
            row.get::<_, String>(0)
          })?
          .collect::<rusqlite::Result<Vec<String>>>();
        keys
      });

    match result {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix, error = %e, "Failed to list store keys");
        Vec::new()
      }
    }
  }

  fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
    let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    let tx = conn.transaction()?;
    for key in keys {
      tx.execute("DELETE FROM kv WHERE key = ?", params![key])?;
    }
    tx.commit()?;
    Ok(())
  }
}
