//! Durable FIFO of writes waiting for connectivity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::operation::{
  Callbacks, FailedOperation, FailureReason, OperationStatus, QueueEvent, QueuedOperation,
};
use crate::api::{ApiRequest, ApiResponse, ErrorKind, NormalizedError, RequestPipeline};
use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::store::KeyValueStore;

/// Store key holding the ordered list of pending operations.
pub const QUEUE_KEY: &str = "offline_queue";

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
  /// Connectivity failures tolerated before an operation is given up on
  pub max_attempts: u32,
  /// Pending operations kept before the oldest is dropped; 0 means unbounded
  pub max_pending: usize,
}

impl Default for QueueSettings {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      max_pending: 500,
    }
  }
}

/// Snapshot returned by [`OfflineQueue::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
  pub online: bool,
  pub pending_count: usize,
  pub pending_operations: Vec<QueuedOperation>,
}

/// What one `drain()` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
  pub attempted: usize,
  pub completed: usize,
  pub failed: usize,
  pub retrying: usize,
}

enum Outcome {
  Completed(Value),
  Retrying,
  Failed(QueuedOperation, FailureReason),
  /// The operation was cleared while its attempt was in flight
  Gone,
}

struct Inner {
  store: Arc<dyn KeyValueStore>,
  pipeline: RequestPipeline,
  connectivity: ConnectivityMonitor,
  clock: Arc<dyn Clock>,
  settings: QueueSettings,
  /// Authoritative pending list, persisted after every change
  pending: Mutex<Vec<QueuedOperation>>,
  /// Ids currently being attempted by the active drain
  in_flight: Mutex<HashSet<String>>,
  /// Held for the whole of a drain; overlapping drains run one after another
  drain_lock: tokio::sync::Mutex<()>,
  /// Whether enqueue starts a drain when online
  background_drain: AtomicBool,
  callbacks: Mutex<HashMap<String, Callbacks>>,
  events: broadcast::Sender<QueueEvent>,
}

/// Offline mutation queue.
///
/// Operations are attempted in enqueue order. Each attempt goes through the
/// request pipeline once. When the server cannot be reached, `attempts` is
/// bumped and the operation is retried on the next drain until
/// `max_attempts` is reached; an error response fails it at once. The pending
/// list is written to the store after every change so a restart resumes
/// where it left off.
#[derive(Clone)]
pub struct OfflineQueue {
  inner: Arc<Inner>,
}

impl OfflineQueue {
  /// Create the queue, restoring any operations persisted by a previous run.
  pub fn new(
    store: Arc<dyn KeyValueStore>,
    pipeline: RequestPipeline,
    connectivity: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
  ) -> Self {
    let restored: Vec<QueuedOperation> = store
      .get_as::<Vec<QueuedOperation>>(QUEUE_KEY)
      .unwrap_or_default()
      .into_iter()
      .filter(QueuedOperation::is_pending)
      .collect();
    if !restored.is_empty() {
      info!(count = restored.len(), "Restored pending operations");
    }

    let (events, _rx) = broadcast::channel(64);

    Self {
      inner: Arc::new(Inner {
        store,
        pipeline,
        connectivity,
        clock,
        settings,
        pending: Mutex::new(restored),
        in_flight: Mutex::new(HashSet::new()),
        drain_lock: tokio::sync::Mutex::new(()),
        background_drain: AtomicBool::new(true),
        callbacks: Mutex::new(HashMap::new()),
        events,
      }),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
    self.inner.events.subscribe()
  }

  /// Turn off the drain `enqueue` starts while online.
  ///
  /// Short-lived hosts that exit right after a write use this so no attempt
  /// is cut off between reaching the server and being recorded.
  pub fn set_background_drain(&self, enabled: bool) {
    self.inner.background_drain.store(enabled, AtomicOrdering::SeqCst);
  }

  fn max_attempts(&self) -> u32 {
    self.inner.settings.max_attempts.max(1)
  }

  fn lock_pending(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
    self
      .inner
      .pending
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
    self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn lock_callbacks(&self) -> MutexGuard<'_, HashMap<String, Callbacks>> {
    self
      .inner
      .callbacks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Apply a change to the pending list and persist the result.
  fn mutate<R>(&self, f: impl FnOnce(&mut Vec<QueuedOperation>) -> R) -> R {
    let mut pending = self.lock_pending();
    let result = f(&mut pending);
    if let Err(e) = self.inner.store.put_as(QUEUE_KEY, &*pending) {
      // The in-memory list stays authoritative; the next change retries
      warn!(error = %e, count = pending.len(), "Failed to persist offline queue");
    }
    result
  }

  /// Queue a write for later replay and return its id.
  ///
  /// The operation is persisted before this returns. When online, a drain
  /// is started in the background.
  pub fn enqueue(&self, request: ApiRequest, callbacks: Callbacks) -> String {
    let mut operation = QueuedOperation::new(request, self.inner.clock.now_ms());
    let max_pending = self.inner.settings.max_pending;

    let (id, evicted) = self.mutate(|pending| {
      while pending.iter().any(|op| op.id == operation.id) {
        operation = QueuedOperation::new(operation.request.clone(), operation.enqueued_at_epoch_ms);
      }
      let id = operation.id.clone();
      // Register before the operation becomes visible to a drain
      self.lock_callbacks().insert(id.clone(), callbacks);
      pending.push(operation);

      let mut evicted = Vec::new();
      if max_pending > 0 {
        let in_flight = self.lock_in_flight();
        while pending.len() > max_pending {
          match pending.iter().position(|op| !in_flight.contains(&op.id)) {
            Some(index) => evicted.push(pending.remove(index)),
            None => break,
          }
        }
      }
      (id, evicted)
    });

    debug!(id = %id, "Enqueued operation");

    for mut operation in evicted {
      warn!(id = %operation.id, request = %operation.request, "Offline queue full, dropping oldest operation");
      operation.status = OperationStatus::Failed;
      self.finish_failed(FailedOperation {
        operation,
        reason: FailureReason::Evicted,
      });
    }

    if self.inner.connectivity.is_online()
      && self.inner.background_drain.load(AtomicOrdering::SeqCst)
    {
      self.spawn_drain();
    }

    id
  }

  fn spawn_drain(&self) {
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let queue = self.clone();
        handle.spawn(async move {
          queue.drain().await;
        });
      }
      Err(_) => debug!("No async runtime, drain deferred"),
    }
  }

  /// Attempt every pending operation once, in enqueue order.
  ///
  /// Only one drain runs at a time. A drain started while another is active
  /// waits for it and then takes whatever is still pending, so replay order
  /// always follows enqueue order and no operation is attempted twice at
  /// once.
  pub async fn drain(&self) -> DrainSummary {
    let _running = self.inner.drain_lock.lock().await;

    let claimed: Vec<QueuedOperation> = {
      let pending = self.lock_pending();
      let mut in_flight = self.lock_in_flight();
      pending
        .iter()
        .filter(|op| op.is_pending() && in_flight.insert(op.id.clone()))
        .cloned()
        .collect()
    };

    let mut summary = DrainSummary::default();
    if claimed.is_empty() {
      return summary;
    }
    info!(count = claimed.len(), "Draining offline queue");

    for operation in claimed {
      summary.attempted += 1;
      let result = self.inner.pipeline.send(&operation.request).await;

      match self.reconcile(&operation.id, result) {
        Outcome::Completed(body) => {
          summary.completed += 1;
          self.finish_completed(&operation.id, body);
        }
        Outcome::Retrying => summary.retrying += 1,
        Outcome::Failed(operation, reason) => {
          summary.failed += 1;
          self.finish_failed(FailedOperation { operation, reason });
        }
        Outcome::Gone => {}
      }

      self.lock_in_flight().remove(&operation.id);
    }

    info!(
      completed = summary.completed,
      retrying = summary.retrying,
      failed = summary.failed,
      "Drain finished"
    );
    summary
  }

  /// Record the result of one attempt in the pending list.
  fn reconcile(&self, id: &str, result: Result<ApiResponse, NormalizedError>) -> Outcome {
    let max_attempts = self.max_attempts();

    self.mutate(|pending| {
      let Some(index) = pending.iter().position(|op| op.id == id) else {
        return Outcome::Gone;
      };

      match result {
        Ok(response) => {
          pending.remove(index);
          Outcome::Completed(response.body)
        }
        Err(e) => {
          let operation = &mut pending[index];
          operation.attempts += 1;
          operation.last_error = Some(e.to_string());

          // Only connectivity failures are worth another attempt
          if e.kind != ErrorKind::NetworkUnreachable {
            let mut operation = pending.remove(index);
            operation.status = OperationStatus::Failed;
            Outcome::Failed(operation, FailureReason::Rejected)
          } else if operation.attempts >= max_attempts {
            let mut operation = pending.remove(index);
            operation.status = OperationStatus::Failed;
            Outcome::Failed(operation, FailureReason::RetriesExhausted)
          } else {
            debug!(id, attempts = operation.attempts, error = %e, "Operation will be retried");
            Outcome::Retrying
          }
        }
      }
    })
  }

  fn finish_completed(&self, id: &str, body: Value) {
    debug!(id, "Queued operation completed");
    let callbacks = self.lock_callbacks().remove(id);
    if let Some(callbacks) = callbacks {
      callbacks.succeed(body.clone());
    }
    let _ = self.inner.events.send(QueueEvent::Completed {
      id: id.to_string(),
      body,
    });
  }

  fn finish_failed(&self, failed: FailedOperation) {
    error!(
      id = %failed.operation.id,
      request = %failed.operation.request,
      attempts = failed.operation.attempts,
      reason = %failed.reason,
      last_error = ?failed.operation.last_error,
      "Queued operation failed"
    );
    let callbacks = self.lock_callbacks().remove(&failed.operation.id);
    if let Some(callbacks) = callbacks {
      callbacks.fail(&failed);
    }
    let _ = self.inner.events.send(QueueEvent::Failed(failed));
  }

  pub fn status(&self) -> QueueStatus {
    let pending = self.lock_pending().clone();
    QueueStatus {
      online: self.inner.connectivity.is_online(),
      pending_count: pending.len(),
      pending_operations: pending,
    }
  }

  /// Drop every pending operation without running it. Callbacks are
  /// discarded without firing.
  pub fn clear(&self) {
    let count = self.mutate(|pending| {
      let count = pending.len();
      pending.clear();
      count
    });
    self.lock_callbacks().clear();
    info!(count, "Cleared offline queue");
  }

  /// Drain once on every offline → online transition.
  ///
  /// The returned task runs until aborted.
  pub fn watch_connectivity(&self) -> JoinHandle<()> {
    let mut rx = self.inner.connectivity.subscribe();
    let mut was_online = *rx.borrow_and_update();
    let queue = self.clone();

    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online && !was_online {
          queue.spawn_drain();
        }
        was_online = online;
      }
    })
  }
}
