//! Generic network-first read with cache fallback on connectivity loss.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::api::{ApiRequest, NormalizedError, RequestPipeline};
use crate::cache::TtlCache;

/// Query parameters. Sorted, so equal parameter sets always produce the same
/// cache key.
pub type Params = BTreeMap<String, String>;

/// Entity types read through the facade, each with its own freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
  Products,
  Product,
  Categories,
  Orders,
  Order,
  Cart,
  DeliveryLocation,
  Analytics,
  Profile,
}

impl Resource {
  pub const ALL: [Resource; 9] = [
    Resource::Products,
    Resource::Product,
    Resource::Categories,
    Resource::Orders,
    Resource::Order,
    Resource::Cart,
    Resource::DeliveryLocation,
    Resource::Analytics,
    Resource::Profile,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Resource::Products => "products",
      Resource::Product => "product",
      Resource::Categories => "categories",
      Resource::Orders => "orders",
      Resource::Order => "order",
      Resource::Cart => "cart",
      Resource::DeliveryLocation => "delivery_location",
      Resource::Analytics => "analytics",
      Resource::Profile => "profile",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|r| r.name() == name)
  }

  /// How long a cached read stays usable. Volatile data gets short windows,
  /// catalog data long ones.
  pub fn default_ttl(&self) -> Duration {
    match self {
      Resource::DeliveryLocation => Duration::seconds(30),
      Resource::Cart => Duration::minutes(2),
      Resource::Orders | Resource::Order => Duration::minutes(5),
      Resource::Analytics => Duration::minutes(15),
      Resource::Profile => Duration::minutes(30),
      Resource::Products | Resource::Categories => Duration::minutes(60),
      Resource::Product => Duration::minutes(120),
    }
  }

  /// Prefix shared by every cache key of this resource.
  pub fn key_prefix(&self) -> String {
    format!("{}_", self.name())
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Cache key for a read: `{resource}_{params as compact JSON}`, e.g.
/// `orders_{}` or `products_{"category":"fruit","page":"2"}`.
pub fn cache_key(resource: Resource, params: &Params) -> String {
  let params = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
  format!("{}{}", resource.key_prefix(), params)
}

/// Result of a facade read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
  pub data: T,
  /// True only when the network was unreachable and cached data was served
  pub from_cache: bool,
  /// When the served cache entry was stored (ms since the Unix epoch)
  pub cached_at_ms: Option<i64>,
}

impl<T> Fetched<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      from_cache: false,
      cached_at_ms: None,
    }
  }

  pub fn from_cache(data: T, cached_at_ms: i64) -> Self {
    Self {
      data,
      from_cache: true,
      cached_at_ms: Some(cached_at_ms),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
    Fetched {
      data: f(self.data),
      from_cache: self.from_cache,
      cached_at_ms: self.cached_at_ms,
    }
  }
}

/// Network-first reader shared by every entity accessor.
#[derive(Clone)]
pub struct ReadThrough {
  pipeline: RequestPipeline,
  cache: TtlCache,
  ttl_overrides: HashMap<Resource, Duration>,
}

impl ReadThrough {
  pub fn new(pipeline: RequestPipeline, cache: TtlCache) -> Self {
    Self {
      pipeline,
      cache,
      ttl_overrides: HashMap::new(),
    }
  }

  /// Replace the default TTL of some resources.
  pub fn with_ttl_overrides(mut self, overrides: HashMap<Resource, Duration>) -> Self {
    self.ttl_overrides = overrides;
    self
  }

  pub fn ttl_for(&self, resource: Resource) -> Duration {
    self
      .ttl_overrides
      .get(&resource)
      .copied()
      .unwrap_or_else(|| resource.default_ttl())
  }

  /// Read `request`, caching the live result under the key derived from
  /// `resource` and `params`.
  ///
  /// Only `NetworkUnreachable` falls back to the cache. Authorization and
  /// server failures always propagate, even when a fresh entry exists.
  pub async fn fetch<T: DeserializeOwned>(
    &self,
    resource: Resource,
    params: &Params,
    request: ApiRequest,
  ) -> Result<Fetched<T>, NormalizedError> {
    let key = cache_key(resource, params);

    let error = match self.pipeline.send(&request).await {
      Ok(response) => {
        let data = decode::<T>(&response.body)?;
        self.cache.set(&key, &response.body, self.ttl_for(resource));
        return Ok(Fetched::from_network(data));
      }
      Err(e) if e.is_network_unreachable() => e,
      Err(e) => return Err(e),
    };

    let Some(entry) = self.cache.get_entry(&key) else {
      debug!(key = %key, "Offline and nothing cached");
      return Err(error);
    };

    match serde_json::from_value::<T>(entry.value) {
      Ok(data) => {
        warn!(key = %key, "Network unreachable, serving cached data");
        Ok(Fetched::from_cache(data, entry.stored_at_epoch_ms))
      }
      Err(e) => {
        warn!(key = %key, error = %e, "Cached data no longer decodes, discarding it");
        self.cache.evict(&key);
        Err(error)
      }
    }
  }
}

fn decode<T: DeserializeOwned>(body: &Value) -> Result<T, NormalizedError> {
  T::deserialize(body).map_err(|e| {
    NormalizedError::unexpected_payload(format!("unexpected response shape: {}", e), body.clone())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{ErrorKind, TransportFailure};
  use crate::clock::ManualClock;
  use crate::session::{CredentialStore, SessionEvents};
  use crate::store::{KeyValueStore, MemoryStore};
  use crate::testing::ScriptedTransport;
  use serde_json::json;
  use std::sync::atomic::{AtomicU16, Ordering};
  use std::sync::Arc;

  struct Harness {
    reads: ReadThrough,
    cache: TtlCache,
    clock: Arc<ManualClock>,
    /// 0 means unreachable
    status: Arc<AtomicU16>,
  }

  fn harness() -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let status = Arc::new(AtomicU16::new(200));
    let current = status.clone();

    let transport = ScriptedTransport::new(move |request| {
      match current.load(Ordering::SeqCst) {
        0 => Err(TransportFailure::TimedOut),
        200 => ScriptedTransport::ok(json!([{ "target": request.target }])),
        code => ScriptedTransport::status(code, json!({ "message": "nope" })),
      }
    });
    let pipeline = RequestPipeline::new(
      Arc::new(transport),
      Arc::new(CredentialStore::new(store.clone())),
      SessionEvents::new(),
      std::time::Duration::from_secs(1),
    );
    let cache = TtlCache::new(store, clock.clone());
    Harness {
      reads: ReadThrough::new(pipeline, cache.clone()),
      cache,
      clock,
      status,
    }
  }

  fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_cache_key_is_stable() {
    assert_eq!(cache_key(Resource::Orders, &Params::new()), "orders_{}");

    let a = params(&[("page", "2"), ("category", "fruit")]);
    let b = params(&[("category", "fruit"), ("page", "2")]);
    assert_eq!(cache_key(Resource::Products, &a), cache_key(Resource::Products, &b));
    assert_eq!(
      cache_key(Resource::Products, &a),
      r#"products_{"category":"fruit","page":"2"}"#
    );
  }

  #[test]
  fn test_ttls_follow_volatility() {
    assert!(Resource::DeliveryLocation.default_ttl() < Resource::Cart.default_ttl());
    assert!(Resource::Orders.default_ttl() < Resource::Product.default_ttl());
    assert_eq!(Resource::from_name("delivery_location"), Some(Resource::DeliveryLocation));
    assert_eq!(Resource::from_name("widgets"), None);
  }

  #[tokio::test]
  async fn test_live_read_is_cached() {
    let h = harness();

    let fetched: Fetched<Value> = h
      .reads
      .fetch(Resource::Orders, &Params::new(), ApiRequest::get("/orders"))
      .await
      .unwrap();

    assert!(!fetched.from_cache);
    assert_eq!(h.cache.get("orders_{}"), Some(fetched.data));
  }

  #[tokio::test]
  async fn test_timeout_falls_back_to_cache() {
    let h = harness();
    let orders = json!([{ "id": "O1" }, { "id": "O2" }]);
    h.cache.set("orders_{}", &orders, Duration::minutes(5));
    h.status.store(0, Ordering::SeqCst);

    let fetched: Fetched<Value> = h
      .reads
      .fetch(Resource::Orders, &Params::new(), ApiRequest::get("/orders"))
      .await
      .unwrap();

    assert!(fetched.from_cache);
    assert_eq!(fetched.data, orders);
    assert_eq!(fetched.cached_at_ms, Some(1_700_000_000_000));
  }

  #[tokio::test]
  async fn test_unreachable_without_cache_propagates() {
    let h = harness();
    h.status.store(0, Ordering::SeqCst);

    let err = h
      .reads
      .fetch::<Value>(Resource::Orders, &Params::new(), ApiRequest::get("/orders"))
      .await
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkUnreachable);
  }

  #[tokio::test]
  async fn test_expired_cache_is_not_served() {
    let h = harness();
    h.cache.set("orders_{}", &json!([]), Duration::minutes(5));
    h.clock.advance_secs(301);
    h.status.store(0, Ordering::SeqCst);

    let result = h
      .reads
      .fetch::<Value>(Resource::Orders, &Params::new(), ApiRequest::get("/orders"))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_non_connectivity_errors_never_use_cache() {
    let h = harness();
    h.cache.set("profile_{}", &json!({ "name": "Ada" }), Duration::minutes(30));

    for (status, kind) in [
      (401, ErrorKind::Unauthorized),
      (403, ErrorKind::Forbidden),
      (500, ErrorKind::ServerError),
      (404, ErrorKind::ClientError),
    ] {
      h.status.store(status, Ordering::SeqCst);
      let err = h
        .reads
        .fetch::<Value>(Resource::Profile, &Params::new(), ApiRequest::get("/profile"))
        .await
        .unwrap_err();
      assert_eq!(err.kind, kind);
    }
    // The fresh entry is untouched, just not served
    assert!(h.cache.get("profile_{}").is_some());
  }

  #[tokio::test]
  async fn test_shape_mismatch_is_client_error() {
    let h = harness();

    let err = h
      .reads
      .fetch::<String>(Resource::Profile, &Params::new(), ApiRequest::get("/profile"))
      .await
      .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ClientError);
    assert!(h.cache.get("profile_{}").is_none());
  }

  #[tokio::test]
  async fn test_ttl_override() {
    let h = harness();
    let mut overrides = HashMap::new();
    overrides.insert(Resource::Orders, Duration::seconds(10));
    let reads = h.reads.clone().with_ttl_overrides(overrides);

    reads
      .fetch::<Value>(Resource::Orders, &Params::new(), ApiRequest::get("/orders"))
      .await
      .unwrap();
    h.clock.advance_secs(11);

    assert!(h.cache.get("orders_{}").is_none());
    assert_eq!(reads.ttl_for(Resource::Cart), Duration::minutes(2));
  }
}
