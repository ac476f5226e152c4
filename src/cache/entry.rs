//! Stored representation of a cached value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value plus the bookkeeping needed to decide whether it is still fresh.
///
/// Entries are replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub value: Value,
  /// When the entry was written (ms since the Unix epoch)
  pub stored_at_epoch_ms: i64,
  /// How long the entry stays fresh, always positive
  pub ttl_ms: i64,
}

impl CacheEntry {
  pub fn new(value: Value, stored_at_epoch_ms: i64, ttl_ms: i64) -> Self {
    Self {
      value,
      stored_at_epoch_ms,
      ttl_ms,
    }
  }

  /// An entry is expired once strictly more than `ttl_ms` has elapsed.
  pub fn is_expired(&self, now_ms: i64) -> bool {
    now_ms - self.stored_at_epoch_ms > self.ttl_ms
  }
}
