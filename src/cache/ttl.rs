//! Expiring cache over a key-value store.

use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::clock::Clock;
use crate::store::KeyValueStore;

/// Namespace for cache entries inside the shared store.
pub const CACHE_PREFIX: &str = "cache_";

/// TTL cache layered on a [`KeyValueStore`].
///
/// Freshness is checked when an entry is read; nothing sweeps in the
/// background. Writes are best effort: a store failure is logged and reported
/// as `false`, never as an error, so a caching problem cannot fail the read
/// that produced the value.
pub struct TtlCache {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  /// TTL used by `set_default`
  default_ttl: Duration,
}

impl TtlCache {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      default_ttl: Duration::minutes(5),
    }
  }

  /// Set the TTL used by `set_default`.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
  }

  /// Cache a value for `ttl`. Returns whether the value was persisted.
  pub fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool {
    let ttl_ms = ttl.num_milliseconds();
    if ttl_ms <= 0 {
      warn!(key, ttl_ms, "Refusing to cache with a non-positive TTL");
      return false;
    }

    let entry = CacheEntry::new(value.clone(), self.clock.now_ms(), ttl_ms);
    match self.store.put_as(&Self::storage_key(key), &entry) {
      Ok(()) => {
        debug!(key, ttl_ms, "Cached value");
        true
      }
      Err(e) => {
        warn!(key, error = %e, "Failed to cache value, continuing without it");
        false
      }
    }
  }

  /// Cache a value with the default TTL.
  pub fn set_default(&self, key: &str, value: &Value) -> bool {
    self.set(key, value, self.default_ttl)
  }

  /// Fresh value for `key`, if any.
  pub fn get(&self, key: &str) -> Option<Value> {
    self.get_entry(key).map(|entry| entry.value)
  }

  /// Fresh entry for `key`, if any. Expired or undecodable entries are
  /// deleted before returning `None`.
  pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let storage_key = Self::storage_key(key);
    let raw = self.store.get(&storage_key)?;

    let entry: CacheEntry = match serde_json::from_value(raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "Discarding unreadable cache entry");
        self.store.delete(&storage_key);
        return None;
      }
    };

    if entry.is_expired(self.clock.now_ms()) {
      debug!(key, "Cache entry expired");
      self.store.delete(&storage_key);
      return None;
    }

    debug!(key, "Cache hit");
    Some(entry)
  }

  /// Remove a single entry.
  pub fn evict(&self, key: &str) {
    self.store.delete(&Self::storage_key(key));
  }

  /// Remove every entry whose storage key starts with `prefix`.
  ///
  /// The prefix is always confined to the cache namespace: `"analytics"` and
  /// `"cache_analytics"` select the same entries, and no prefix can reach
  /// queue or credential keys. Returns the number of entries removed.
  pub fn evict_by_prefix(&self, prefix: &str) -> usize {
    let prefix = if prefix.starts_with(CACHE_PREFIX) {
      prefix.to_string()
    } else {
      Self::storage_key(prefix)
    };

    let keys = self.store.keys(&prefix);
    if keys.is_empty() {
      return 0;
    }

    match self.store.delete_all(&keys) {
      Ok(()) => {
        debug!(prefix = %prefix, count = keys.len(), "Evicted cache entries");
        keys.len()
      }
      Err(e) => {
        warn!(prefix = %prefix, error = %e, "Failed to evict cache entries");
        0
      }
    }
  }

  /// Remove every cache entry.
  pub fn clear(&self) -> usize {
    self.evict_by_prefix(CACHE_PREFIX)
  }
}

impl Clone for TtlCache {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      clock: Arc::clone(&self.clock),
      default_ttl: self.default_ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{MemoryStore, SqliteStore};
  use serde_json::json;

  fn cache_with_clock() -> (TtlCache, Arc<dyn KeyValueStore>, Arc<ManualClock>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = TtlCache::new(store.clone(), clock.clone());
    (cache, store, clock)
  }

  #[test]
  fn test_product_expires_after_ttl() {
    let (cache, store, clock) = cache_with_clock();
    let product = json!({ "name": "Apples", "price": 4.99 });

    assert!(cache.set("product_42", &product, Duration::minutes(1)));
    assert_eq!(cache.get("product_42"), Some(product));

    clock.advance_secs(61);
    assert_eq!(cache.get("product_42"), None);
    // Read-triggered eviction removed the entry
    assert!(store.keys("cache_").is_empty());
  }

  #[test]
  fn test_entry_is_fresh_exactly_at_ttl() {
    let (cache, _store, clock) = cache_with_clock();
    cache.set("k", &json!(1), Duration::seconds(30));

    clock.advance_ms(30_000);
    assert_eq!(cache.get("k"), Some(json!(1)));
    clock.advance_ms(1);
    assert_eq!(cache.get("k"), None);
  }

  #[test]
  fn test_default_ttl_is_five_minutes() {
    let (cache, _store, clock) = cache_with_clock();
    cache.set_default("orders_{}", &json!([]));

    clock.advance_secs(300);
    assert!(cache.get("orders_{}").is_some());
    clock.advance_secs(1);
    assert!(cache.get("orders_{}").is_none());
  }

  #[test]
  fn test_non_positive_ttl_is_rejected() {
    let (cache, store, _clock) = cache_with_clock();
    assert!(!cache.set("k", &json!(1), Duration::zero()));
    assert!(!cache.set("k", &json!(1), Duration::seconds(-5)));
    assert!(store.keys("").is_empty());
  }

  #[test]
  fn test_keys_are_namespaced() {
    let (cache, store, _clock) = cache_with_clock();
    cache.set_default("profile", &json!({ "name": "Ada" }));

    assert_eq!(store.keys(""), vec!["cache_profile"]);
  }

  #[test]
  fn test_evict_by_prefix_is_scoped() {
    let (cache, store, _clock) = cache_with_clock();
    cache.set_default("analytics_sales_{}", &json!(1));
    cache.set_default("analytics_traffic_{}", &json!(2));
    cache.set_default("orders_{}", &json!([]));
    store.put("auth_token", &json!("secret")).unwrap();
    store.put("offline_queue", &json!([])).unwrap();

    assert_eq!(cache.evict_by_prefix("cache_analytics"), 2);

    assert_eq!(store.keys("cache_"), vec!["cache_orders_{}"]);
    assert_eq!(store.get("auth_token"), Some(json!("secret")));
    assert_eq!(store.get("offline_queue"), Some(json!([])));
  }

  #[test]
  fn test_evict_by_prefix_cannot_escape_namespace() {
    let (cache, store, _clock) = cache_with_clock();
    store.put("auth_token", &json!("secret")).unwrap();
    cache.set_default("auth_hint", &json!(true));

    assert_eq!(cache.evict_by_prefix("auth"), 1);
    assert_eq!(store.get("auth_token"), Some(json!("secret")));
  }

  #[test]
  fn test_clear_removes_all_entries() {
    let (cache, store, _clock) = cache_with_clock();
    cache.set_default("a", &json!(1));
    cache.set_default("b", &json!(2));
    store.put("offline_queue", &json!([])).unwrap();

    assert_eq!(cache.clear(), 2);
    assert_eq!(store.keys(""), vec!["offline_queue"]);
  }

  #[test]
  fn test_set_failure_is_reported_not_raised() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_quota(8));
    let cache = TtlCache::new(store, Arc::new(ManualClock::new(0)));

    assert!(!cache.set_default("catalog", &json!({ "items": [1, 2, 3] })));
    assert_eq!(cache.get("catalog"), None);
  }

  #[test]
  fn test_corrupt_entry_is_a_miss_and_removed() {
    let (cache, store, _clock) = cache_with_clock();
    store.put("cache_orders_{}", &json!({ "unexpected": true })).unwrap();

    assert_eq!(cache.get("orders_{}"), None);
    assert!(store.keys("cache_").is_empty());
  }
}
