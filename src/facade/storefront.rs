//! Per-entity accessors used by the storefront and admin pages.

use serde_json::{json, Value};
use tracing::{debug, info};

use super::cart::{CartSnapshot, CartView};
use super::read_through::{Fetched, Params, ReadThrough, Resource};
use crate::api::{ApiRequest, NormalizedError, RequestPipeline};
use crate::cache::TtlCache;
use crate::connectivity::ConnectivityMonitor;
use crate::queue::{Callbacks, OfflineQueue};

/// Result of a write issued through the facade.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
  /// The server accepted the write; carries the response body
  Completed(Value),
  /// The write was queued for replay; callbacks fire when it resolves
  Queued { id: String },
}

impl MutationOutcome {
  pub fn is_queued(&self) -> bool {
    matches!(self, MutationOutcome::Queued { .. })
  }
}

/// Storefront data access.
///
/// Reads are network-first with cache fallback (see [`ReadThrough`]).
/// Writes go straight to the server when online and are queued when offline
/// or when the server cannot be reached. Callbacks passed to a write only
/// fire if it ends up queued; a live write reports through its return value.
#[derive(Clone)]
pub struct StorefrontApi {
  reads: ReadThrough,
  pipeline: RequestPipeline,
  cache: TtlCache,
  queue: OfflineQueue,
  connectivity: ConnectivityMonitor,
}

impl StorefrontApi {
  pub fn new(
    reads: ReadThrough,
    pipeline: RequestPipeline,
    cache: TtlCache,
    queue: OfflineQueue,
    connectivity: ConnectivityMonitor,
  ) -> Self {
    Self {
      reads,
      pipeline,
      cache,
      queue,
      connectivity,
    }
  }

  fn id_params(id: &str) -> Params {
    let mut params = Params::new();
    params.insert("id".to_string(), id.to_string());
    params
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub async fn products(&self, query: &Params) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get("/products").with_query(query.clone());
    self.reads.fetch(Resource::Products, query, request).await
  }

  pub async fn product(&self, id: &str) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get(format!("/products/{}", id));
    self.reads.fetch(Resource::Product, &Self::id_params(id), request).await
  }

  pub async fn categories(&self) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get("/categories");
    self.reads.fetch(Resource::Categories, &Params::new(), request).await
  }

  pub async fn orders(&self, query: &Params) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get("/orders").with_query(query.clone());
    self.reads.fetch(Resource::Orders, query, request).await
  }

  pub async fn order(&self, id: &str) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get(format!("/orders/{}", id));
    self.reads.fetch(Resource::Order, &Self::id_params(id), request).await
  }

  /// Cart contents with totals computed from the items that were read.
  pub async fn cart(&self) -> Result<Fetched<CartView>, NormalizedError> {
    let fetched: Fetched<CartSnapshot> = self
      .reads
      .fetch(Resource::Cart, &Params::new(), ApiRequest::get("/cart"))
      .await?;
    Ok(fetched.map(CartView::from))
  }

  pub async fn delivery_location(&self, order_id: &str) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get(format!("/orders/{}/delivery-location", order_id));
    self
      .reads
      .fetch(Resource::DeliveryLocation, &Self::id_params(order_id), request)
      .await
  }

  pub async fn analytics(&self, report: &str, range: &Params) -> Result<Fetched<Value>, NormalizedError> {
    let mut params = range.clone();
    params.insert("report".to_string(), report.to_string());
    let request = ApiRequest::get(format!("/admin/analytics/{}", report)).with_query(range.clone());
    self.reads.fetch(Resource::Analytics, &params, request).await
  }

  pub async fn profile(&self) -> Result<Fetched<Value>, NormalizedError> {
    let request = ApiRequest::get("/profile");
    self.reads.fetch(Resource::Profile, &Params::new(), request).await
  }

  /// Drop every cached analytics report.
  pub fn clear_analytics(&self) -> usize {
    self.cache.evict_by_prefix(&Resource::Analytics.key_prefix())
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  pub async fn add_cart_item(
    &self,
    product_id: &str,
    quantity: u32,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::post(
      "/cart/items",
      json!({ "productId": product_id, "quantity": quantity }),
    );
    self.mutate(request, &[Resource::Cart], callbacks).await
  }

  pub async fn update_cart_item(
    &self,
    product_id: &str,
    quantity: u32,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::patch(
      format!("/cart/items/{}", product_id),
      json!({ "quantity": quantity }),
    );
    self.mutate(request, &[Resource::Cart], callbacks).await
  }

  pub async fn remove_cart_item(
    &self,
    product_id: &str,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::delete(format!("/cart/items/{}", product_id));
    self.mutate(request, &[Resource::Cart], callbacks).await
  }

  pub async fn place_order(
    &self,
    order: Value,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::post("/orders", order);
    self
      .mutate(request, &[Resource::Orders, Resource::Cart], callbacks)
      .await
  }

  pub async fn update_order_status(
    &self,
    order_id: &str,
    status: &str,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::patch(
      format!("/orders/{}/status", order_id),
      json!({ "status": status }),
    );
    self
      .mutate(request, &[Resource::Orders, Resource::Order], callbacks)
      .await
  }

  pub async fn update_product(
    &self,
    product_id: &str,
    product: Value,
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    let request = ApiRequest::put(format!("/products/{}", product_id), product);
    self
      .mutate(request, &[Resource::Products, Resource::Product], callbacks)
      .await
  }

  /// Send a write, or queue it when the server cannot be reached.
  ///
  /// A live success evicts the cached reads of `invalidates`.
  pub async fn mutate(
    &self,
    request: ApiRequest,
    invalidates: &[Resource],
    callbacks: Callbacks,
  ) -> Result<MutationOutcome, NormalizedError> {
    if !self.connectivity.is_online() {
      let id = self.queue.enqueue(request, callbacks);
      info!(id = %id, "Offline, write queued");
      return Ok(MutationOutcome::Queued { id });
    }

    match self.pipeline.send(&request).await {
      Ok(response) => {
        for resource in invalidates {
          let evicted = self.cache.evict_by_prefix(&resource.key_prefix());
          debug!(resource = %resource, evicted, "Invalidated cached reads");
        }
        Ok(MutationOutcome::Completed(response.body))
      }
      Err(e) if e.is_network_unreachable() => {
        let id = self.queue.enqueue(request, callbacks);
        info!(id = %id, error = %e, "Server unreachable, write queued");
        Ok(MutationOutcome::Queued { id })
      }
      Err(e) => Err(e),
    }
  }
}
