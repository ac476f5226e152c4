//! Offline mutation queue.
//!
//! Writes that cannot reach the server are persisted here and replayed in
//! enqueue order once connectivity returns. An operation completes and is
//! removed, or fails and is removed with its failure callback fired. Only a
//! failure to reach the server is retried, up to `max_attempts`; a server
//! error response fails the operation at once. There is no backoff between
//! attempts: each drain is one attempt per pending operation.

mod offline;
mod operation;

pub use offline::{DrainSummary, OfflineQueue, QueueSettings, QueueStatus, QUEUE_KEY};
pub use operation::{
  Callbacks, FailedOperation, FailureReason, OperationStatus, QueueEvent, QueuedOperation,
};
