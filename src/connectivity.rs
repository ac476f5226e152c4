//! Process-wide online/offline state.
//!
//! The host owns the signal: it calls [`ConnectivityMonitor::set_online`]
//! when the platform reports a change. Business logic only reads the state
//! or subscribes to transitions.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::info;
use url::Url;

#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  /// Create a monitor seeded with the platform's current reachability.
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a connectivity notification. Repeating the current state does
  /// not wake subscribers.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
  }

  /// Receiver that observes every state change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Check whether the API host accepts TCP connections.
///
/// Used by hosts without a platform reachability signal (the CLI) to seed
/// and refresh the monitor.
pub async fn probe(base_url: &Url, timeout: Duration) -> bool {
  let Some(host) = base_url.host_str() else {
    return false;
  };
  let Some(port) = base_url.port_or_known_default() else {
    return false;
  };

  matches!(
    tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
    Ok(Ok(_))
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_only_real_transitions_notify() {
    let monitor = ConnectivityMonitor::new(false);
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    assert!(!rx.has_changed().unwrap());

    monitor.set_online(true);
    assert!(rx.has_changed().unwrap());
    assert!(*rx.borrow_and_update());
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn test_probe_reaches_local_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = Url::parse(&format!("http://127.0.0.1:{}/api", port)).unwrap();

    assert!(probe(&url, Duration::from_secs(1)).await);
  }

  #[tokio::test]
  async fn test_probe_without_host_is_offline() {
    let url = Url::parse("file:///tmp/api").unwrap();
    assert!(!probe(&url, Duration::from_millis(50)).await);
  }
}
