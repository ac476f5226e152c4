//! Bearer credential storage and session-level signals.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::{KeyValueStore, StoreError};

/// Store key holding the bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Signals raised when the remote service rejects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
  /// The credential was rejected (HTTP 401) and has been cleared
  Unauthorized,
  /// The credential is valid but lacks permission (HTTP 403)
  Forbidden,
}

/// Broadcast channel for [`SessionEvent`]s. The host subscribes and decides
/// what to do (redirect to login, show a notice); this crate never navigates.
#[derive(Clone)]
pub struct SessionEvents {
  tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(16);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
    self.tx.subscribe()
  }

  pub fn emit(&self, event: SessionEvent) {
    // No subscribers is fine
    let _ = self.tx.send(event);
    info!(?event, "Session event");
  }
}

impl Default for SessionEvents {
  fn default() -> Self {
    Self::new()
  }
}

/// Bearer token persisted in the key-value store.
///
/// Whether that store is durable or session-scoped is the host's choice.
pub struct CredentialStore {
  store: Arc<dyn KeyValueStore>,
  /// Serializes read-compare-delete in `invalidate`
  lock: Mutex<()>,
  /// A rejection was already reported for the current session
  invalidated: AtomicBool,
}

impl CredentialStore {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self {
      store,
      lock: Mutex::new(()),
      invalidated: AtomicBool::new(false),
    }
  }

  /// Current bearer token, if any.
  pub fn token(&self) -> Option<String> {
    match self.store.get(AUTH_TOKEN_KEY)? {
      Value::String(token) if !token.is_empty() => Some(token),
      Value::String(_) => None,
      _ => {
        warn!("Ignoring non-string credential");
        None
      }
    }
  }

  pub fn set(&self, token: &str) -> Result<(), StoreError> {
    let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
    self.store.put(AUTH_TOKEN_KEY, &Value::String(token.to_string()))?;
    self.invalidated.store(false, Ordering::SeqCst);
    Ok(())
  }

  /// Remove the stored token. Returns whether one was present.
  pub fn clear(&self) -> bool {
    let Ok(_guard) = self.lock.lock() else {
      return false;
    };
    let present = self.store.get_raw(AUTH_TOKEN_KEY).is_some();
    self.store.delete(AUTH_TOKEN_KEY);
    self.invalidated.store(false, Ordering::SeqCst);
    present
  }

  /// Record that the server rejected the credential a request carried.
  ///
  /// `sent_with` is the token the request was sent with. The stored token is
  /// removed only if it is still that one, so a token from a newer login
  /// survives. Returns true for exactly one caller per session: whoever
  /// removed the token or, for requests sent without one, the first
  /// rejection since the last `set` or `clear`.
  pub fn invalidate(&self, sent_with: Option<&str>) -> bool {
    let Ok(_guard) = self.lock.lock() else {
      return false;
    };

    match (sent_with, self.token()) {
      (Some(sent), Some(current)) if sent == current => {
        self.store.delete(AUTH_TOKEN_KEY);
        self.invalidated.store(true, Ordering::SeqCst);
        true
      }
      (None, None) => !self.invalidated.swap(true, Ordering::SeqCst),
      _ => {
        debug!("Credential already cleared or replaced");
        false
      }
    }
  }
}
