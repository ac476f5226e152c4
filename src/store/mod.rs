//! Durable key-value storage shared by the cache, the offline queue and the
//! credential store.
//!
//! Stores are synchronous and hold JSON trees. Reads never fail loudly: a
//! value that cannot be decoded is reported as absent (and logged), except
//! for plain legacy strings, which come back verbatim.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Errors raised when writing to a store.
///
/// These never leave the crate's primary operations: the cache and the queue
/// log them and carry on without the persisted copy.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to serialize value for {key}: {source}")]
  Serialization {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("storage quota exceeded writing {key}: {size} bytes would exceed the {limit} byte limit")]
  QuotaExceeded {
    key: String,
    size: usize,
    limit: usize,
  },

  #[error("storage backend error: {0}")]
  Backend(#[from] rusqlite::Error),

  #[error("storage lock poisoned")]
  Poisoned,
}

/// Trait for key-value storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Store raw bytes under a key, replacing any previous value.
  fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

  /// Raw bytes stored under a key.
  fn get_raw(&self, key: &str) -> Option<Vec<u8>>;

  /// Remove a key. Removing a missing key is a no-op.
  fn delete(&self, key: &str);

  /// All keys starting with `prefix`, in ascending order.
  fn keys(&self, prefix: &str) -> Vec<String>;

  /// Remove several keys at once.
  ///
  /// Backends that support transactions override this so that readers never
  /// observe a partially removed set.
  fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
    for key in keys {
      self.delete(key);
    }
    Ok(())
  }

  /// Serialize and store a JSON value.
  fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialization {
      key: key.to_string(),
      source,
    })?;
    self.put_raw(key, bytes)
  }

  /// Load and decode a JSON value. See [`decode_stored`].
  fn get(&self, key: &str) -> Option<Value> {
    let raw = self.get_raw(key)?;
    decode_stored(key, &raw)
  }
}

impl dyn KeyValueStore {
  /// Store any serializable value.
  pub fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serialization {
      key: key.to_string(),
      source,
    })?;
    self.put(key, &value)
  }

  /// Load a value and convert it to `T`, treating a shape mismatch as absent.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get(key)?;
    match serde_json::from_value(value) {
      Ok(typed) => Some(typed),
      Err(e) => {
        warn!(key, error = %e, "Stored value has an unexpected shape, ignoring it");
        None
      }
    }
  }
}

/// Decode stored bytes into a JSON value.
///
/// Valid JSON decodes normally. Text that does not start like a JSON document
/// is a plain legacy string and is returned as [`Value::String`]. Anything
/// else (truncated documents, binary garbage) is logged and treated as
/// missing.
pub fn decode_stored(key: &str, raw: &[u8]) -> Option<Value> {
  let parse_error = match serde_json::from_slice::<Value>(raw) {
    Ok(value) => return Some(value),
    Err(e) => e,
  };

  match std::str::from_utf8(raw) {
    Ok(text) if !looks_like_json(text) => Some(Value::String(text.to_string())),
    Ok(_) => {
      warn!(key, error = %parse_error, "Malformed JSON in store");
      None
    }
    Err(_) => {
      warn!(key, len = raw.len(), "Stored value is not valid UTF-8");
      None
    }
  }
}

fn looks_like_json(text: &str) -> bool {
  matches!(text.trim_start().chars().next(), Some('{' | '[' | '"'))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_decode_valid_json() {
    assert_eq!(
      decode_stored("k", br#"{"a":1}"#),
      Some(json!({ "a": 1 }))
    );
  }

  #[test]
  fn test_decode_plain_string_is_returned_verbatim() {
    assert_eq!(
      decode_stored("k", b"legacy-session-value"),
      Some(Value::String("legacy-session-value".into()))
    );
  }

  #[test]
  fn test_decode_truncated_document_is_missing() {
    assert_eq!(decode_stored("k", br#"{"name": "App"#), None);
    assert_eq!(decode_stored("k", b"[1, 2"), None);
  }

  #[test]
  fn test_decode_binary_garbage_is_missing() {
    assert_eq!(decode_stored("k", &[0xff, 0xfe, 0x00]), None);
  }

  #[test]
  fn test_typed_helpers() {
    let store: Box<dyn KeyValueStore> = Box::new(MemoryStore::new());
    store.put_as("nums", &vec![1, 2, 3]).unwrap();
    assert_eq!(store.get_as::<Vec<i32>>("nums"), Some(vec![1, 2, 3]));
    assert_eq!(store.get_as::<String>("nums"), None);
  }
}
