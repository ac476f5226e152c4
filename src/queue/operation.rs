//! Queued write operations and their lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::ApiRequest;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
  Pending,
  Completed,
  Failed,
}

/// A write that could not be completed live and waits for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
  pub id: String,
  pub request: ApiRequest,
  pub enqueued_at_epoch_ms: i64,
  /// Failed attempts so far; never decreases
  pub attempts: u32,
  pub status: OperationStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl QueuedOperation {
  pub fn new(request: ApiRequest, now_ms: i64) -> Self {
    Self {
      id: generate_id(&request, now_ms),
      request,
      enqueued_at_epoch_ms: now_ms,
      attempts: 0,
      status: OperationStatus::Pending,
      last_error: None,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.status == OperationStatus::Pending
  }
}

/// Operation id: SHA-256 over the enqueue time, a process-wide sequence
/// number, the process id and the request, truncated to 16 bytes.
fn generate_id(request: &ApiRequest, now_ms: i64) -> String {
  let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(now_ms.to_be_bytes());
  hasher.update(seq.to_be_bytes());
  hasher.update(std::process::id().to_be_bytes());
  hasher.update(request.method.as_str().as_bytes());
  hasher.update(request.target.as_bytes());
  if let Some(body) = &request.body {
    hasher.update(body.to_string().as_bytes());
  }
  hex::encode(&hasher.finalize()[..16])
}

/// Why an operation left the queue without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
  /// Every allowed attempt failed to reach the server
  RetriesExhausted,
  /// The server answered with an error; such writes are not retried
  Rejected,
  /// Pushed out by newer operations when the queue was full
  Evicted,
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureReason::RetriesExhausted => write!(f, "retries exhausted"),
      FailureReason::Rejected => write!(f, "rejected by server"),
      FailureReason::Evicted => write!(f, "evicted from full queue"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
  pub operation: QueuedOperation,
  pub reason: FailureReason,
}

/// Outcome notifications for observers other than the enqueuing caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
  Completed { id: String, body: Value },
  Failed(FailedOperation),
}

type SuccessFn = Box<dyn FnOnce(Value) + Send>;
type FailureFn = Box<dyn FnOnce(&FailedOperation) + Send>;

/// Caller-supplied hooks fired when a queued operation reaches a terminal
/// state. Held in memory only; they do not survive a restart.
#[derive(Default)]
pub struct Callbacks {
  on_success: Option<SuccessFn>,
  on_failure: Option<FailureFn>,
}

impl Callbacks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_success(mut self, f: impl FnOnce(Value) + Send + 'static) -> Self {
    self.on_success = Some(Box::new(f));
    self
  }

  pub fn on_failure(mut self, f: impl FnOnce(&FailedOperation) + Send + 'static) -> Self {
    self.on_failure = Some(Box::new(f));
    self
  }

  pub(crate) fn succeed(self, body: Value) {
    if let Some(f) = self.on_success {
      f(body);
    }
  }

  pub(crate) fn fail(self, failed: &FailedOperation) {
    if let Some(f) = self.on_failure {
      f(failed);
    }
  }
}

impl fmt::Debug for Callbacks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Callbacks")
      .field("on_success", &self.on_success.is_some())
      .field("on_failure", &self.on_failure.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_ids_are_unique_for_identical_requests() {
    let request = ApiRequest::post("/cart/items", json!({ "productId": "P1", "quantity": 2 }));
    let a = QueuedOperation::new(request.clone(), 1_000);
    let b = QueuedOperation::new(request, 1_000);

    assert_ne!(a.id, b.id);
    assert_eq!(a.id.len(), 32);
  }

  #[test]
  fn test_new_operation_is_pending() {
    let op = QueuedOperation::new(ApiRequest::delete("/cart/items/P1"), 5);
    assert!(op.is_pending());
    assert_eq!(op.attempts, 0);
    assert_eq!(op.last_error, None);
  }

  #[test]
  fn test_persisted_shape() {
    let mut op = QueuedOperation::new(ApiRequest::post("/orders", json!({})), 42);
    op.id = "abc".into();
    let value = serde_json::to_value(&op).unwrap();

    assert_eq!(
      value,
      json!({
        "id": "abc",
        "request": { "method": "POST", "target": "/orders", "body": {} },
        "enqueuedAtEpochMs": 42,
        "attempts": 0,
        "status": "pending"
      })
    );
  }
}
