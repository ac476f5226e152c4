//! The single error shape produced for failed remote calls.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// No response at all: refused connection, DNS failure, timeout
  NetworkUnreachable,
  /// HTTP 401
  Unauthorized,
  /// HTTP 403
  Forbidden,
  /// HTTP 5xx
  ServerError,
  /// Any other non-success status
  ClientError,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::NetworkUnreachable => "network unreachable",
      ErrorKind::Unauthorized => "unauthorized",
      ErrorKind::Forbidden => "forbidden",
      ErrorKind::ServerError => "server error",
      ErrorKind::ClientError => "client error",
    };
    f.write_str(name)
  }
}

/// A classified remote failure. Produced once per failed call by the
/// request pipeline and passed through unchanged everywhere else.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct NormalizedError {
  pub kind: ErrorKind,
  pub message: String,
  /// HTTP status, when a response was received
  pub status: Option<u16>,
  /// Response body, when one was received
  pub payload: Option<Value>,
}

impl NormalizedError {
  pub fn network_unreachable(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::NetworkUnreachable,
      message: message.into(),
      status: None,
      payload: None,
    }
  }

  /// Classify a non-success HTTP response.
  pub fn from_status(status: u16, payload: Value) -> Self {
    let kind = match status {
      401 => ErrorKind::Unauthorized,
      403 => ErrorKind::Forbidden,
      500..=599 => ErrorKind::ServerError,
      _ => ErrorKind::ClientError,
    };

    let message = payload_message(&payload).unwrap_or_else(|| format!("HTTP {}", status));
    let payload = if payload.is_null() { None } else { Some(payload) };

    Self {
      kind,
      message,
      status: Some(status),
      payload,
    }
  }

  /// A response arrived but did not have the expected shape.
  pub fn unexpected_payload(message: impl Into<String>, payload: Value) -> Self {
    Self {
      kind: ErrorKind::ClientError,
      message: message.into(),
      status: None,
      payload: Some(payload),
    }
  }

  pub fn is_network_unreachable(&self) -> bool {
    self.kind == ErrorKind::NetworkUnreachable
  }
}

/// Human-readable message carried in an error body, if any.
fn payload_message(payload: &Value) -> Option<String> {
  ["message", "error"]
    .iter()
    .find_map(|field| payload.get(field).and_then(Value::as_str))
    .map(String::from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_status_classification() {
    let kind = |status| NormalizedError::from_status(status, Value::Null).kind;
    assert_eq!(kind(401), ErrorKind::Unauthorized);
    assert_eq!(kind(403), ErrorKind::Forbidden);
    assert_eq!(kind(500), ErrorKind::ServerError);
    assert_eq!(kind(503), ErrorKind::ServerError);
    assert_eq!(kind(404), ErrorKind::ClientError);
    assert_eq!(kind(422), ErrorKind::ClientError);
    assert_eq!(kind(304), ErrorKind::ClientError);
  }

  #[test]
  fn test_message_from_payload() {
    let err = NormalizedError::from_status(422, json!({ "message": "quantity must be positive" }));
    assert_eq!(err.message, "quantity must be positive");
    assert_eq!(err.status, Some(422));
    assert!(err.payload.is_some());

    let err = NormalizedError::from_status(500, json!({ "error": "db down" }));
    assert_eq!(err.message, "db down");

    let err = NormalizedError::from_status(502, Value::Null);
    assert_eq!(err.message, "HTTP 502");
    assert_eq!(err.payload, None);
  }

  #[test]
  fn test_display() {
    let err = NormalizedError::network_unreachable("connection refused");
    assert_eq!(err.to_string(), "network unreachable: connection refused");
  }
}
