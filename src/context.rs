//! Root object that owns and wires every component.
//!
//! Build one per process and hand its parts to whoever needs them. Nothing
//! in the crate reaches for global state.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{HttpTransport, RequestPipeline, Transport};
use crate::cache::TtlCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::facade::{ReadThrough, Resource, StorefrontApi};
use crate::queue::{OfflineQueue, QueueSettings};
use crate::session::{CredentialStore, SessionEvents};
use crate::store::{KeyValueStore, SqliteStore};

/// Tunables for [`ClientContext::new`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
  pub request_timeout: Duration,
  pub default_ttl: chrono::Duration,
  pub ttl_overrides: HashMap<Resource, chrono::Duration>,
  pub queue: QueueSettings,
  /// Reachability at startup
  pub online: bool,
}

impl Default for ContextOptions {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(15),
      default_ttl: chrono::Duration::minutes(5),
      ttl_overrides: HashMap::new(),
      queue: QueueSettings::default(),
      online: true,
    }
  }
}

impl ContextOptions {
  pub fn from_config(config: &Config, online: bool) -> Self {
    Self {
      request_timeout: config.api.timeout(),
      default_ttl: config.cache.default_ttl(),
      ttl_overrides: config.cache.ttl_overrides(),
      queue: config.queue,
      online,
    }
  }
}

pub struct ClientContext {
  pub store: Arc<dyn KeyValueStore>,
  pub clock: Arc<dyn Clock>,
  pub connectivity: ConnectivityMonitor,
  pub session_events: SessionEvents,
  pub credentials: Arc<CredentialStore>,
  pub cache: TtlCache,
  pub pipeline: RequestPipeline,
  pub queue: OfflineQueue,
  pub api: StorefrontApi,
}

impl ClientContext {
  pub fn new(
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    options: ContextOptions,
  ) -> Self {
    let connectivity = ConnectivityMonitor::new(options.online);
    let session_events = SessionEvents::new();
    let credentials = Arc::new(CredentialStore::new(store.clone()));

    let cache = TtlCache::new(store.clone(), clock.clone()).with_default_ttl(options.default_ttl);
    let pipeline = RequestPipeline::new(
      transport,
      credentials.clone(),
      session_events.clone(),
      options.request_timeout,
    );
    let queue = OfflineQueue::new(
      store.clone(),
      pipeline.clone(),
      connectivity.clone(),
      clock.clone(),
      options.queue,
    );
    let reads =
      ReadThrough::new(pipeline.clone(), cache.clone()).with_ttl_overrides(options.ttl_overrides);
    let api = StorefrontApi::new(
      reads,
      pipeline.clone(),
      cache.clone(),
      queue.clone(),
      connectivity.clone(),
    );

    Self {
      store,
      clock,
      connectivity,
      session_events,
      credentials,
      cache,
      pipeline,
      queue,
      api,
    }
  }

  /// Production wiring: SQLite store, HTTP transport, wall clock.
  pub fn from_config(config: &Config, online: bool) -> Result<Self> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(config.storage.path.as_deref())?);
    let transport = Arc::new(HttpTransport::new(config.api.base_url()?, config.api.timeout())?);

    let context = Self::new(
      store,
      transport,
      Arc::new(SystemClock),
      ContextOptions::from_config(config, online),
    );

    if let Some(token) = Config::get_api_token() {
      if let Err(e) = context.credentials.set(&token) {
        warn!(error = %e, "Failed to store API token from environment");
      }
    }

    info!(online, pending = context.queue.status().pending_count, "Client context ready");
    Ok(context)
  }

  /// Start background work: draining the queue on reconnect.
  pub fn start(&self) -> JoinHandle<()> {
    self.queue.watch_connectivity()
  }
}
