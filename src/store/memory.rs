//! In-process store. Nothing survives the process; used for ephemeral
//! sessions and tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::warn;

use super::{KeyValueStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, Vec<u8>>>,
  /// Upper bound on the total size of stored values, in bytes
  quota: Option<usize>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a store that rejects writes once stored values exceed `bytes`.
  pub fn with_quota(bytes: usize) -> Self {
    Self {
      entries: Mutex::default(),
      quota: Some(bytes),
    }
  }
}

impl KeyValueStore for MemoryStore {
  fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

    if let Some(limit) = self.quota {
      let others: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(_, v)| v.len())
        .sum();
      let size = others + bytes.len();
      if size > limit {
        return Err(StoreError::QuotaExceeded {
          key: key.to_string(),
          size,
          limit,
        });
      }
    }

    entries.insert(key.to_string(), bytes);
    Ok(())
  }

  fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
    match self.entries.lock() {
      Ok(entries) => entries.get(key).cloned(),
      Err(_) => {
        warn!(key, "Memory store lock poisoned");
        None
      }
    }
  }

  fn delete(&self, key: &str) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.remove(key);
    }
  }

  fn keys(&self, prefix: &str) -> Vec<String> {
    match self.entries.lock() {
      Ok(entries) => entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect(),
      Err(_) => Vec::new(),
    }
  }

  fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
    for key in keys {
      entries.remove(key);
    }
    Ok(())
  }
}
