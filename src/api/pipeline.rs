//! Request pipeline: credential injection and failure classification.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{ErrorKind, NormalizedError};
use super::transport::Transport;
use super::types::{ApiRequest, ApiResponse};
use crate::session::{CredentialStore, SessionEvent, SessionEvents};

/// Wraps a [`Transport`] and turns every outcome into either a successful
/// response or exactly one [`NormalizedError`].
///
/// The pipeline never retries. Reads fall back to the cache and mutations
/// go to the offline queue; both decisions are made by the caller from the
/// error kind.
#[derive(Clone)]
pub struct RequestPipeline {
  transport: Arc<dyn Transport>,
  credentials: Arc<CredentialStore>,
  events: SessionEvents,
  timeout: Duration,
}

impl RequestPipeline {
  pub fn new(
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    events: SessionEvents,
    timeout: Duration,
  ) -> Self {
    Self {
      transport,
      credentials,
      events,
      timeout,
    }
  }

  pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, NormalizedError> {
    let token = self.credentials.token();

    let outcome = tokio::time::timeout(
      self.timeout,
      self.transport.execute(request, token.as_deref()),
    )
    .await;

    let response = match outcome {
      Ok(Ok(response)) => response,
      Ok(Err(failure)) => {
        let error = NormalizedError::network_unreachable(failure.to_string());
        warn!(%request, error = %error, "Request failed without a response");
        return Err(error);
      }
      Err(_) => {
        let error = NormalizedError::network_unreachable(format!(
          "no response within {}ms",
          self.timeout.as_millis()
        ));
        warn!(%request, error = %error, "Request timed out");
        return Err(error);
      }
    };

    if response.is_success() {
      debug!(%request, status = response.status, "Request succeeded");
      return Ok(response);
    }

    let error = NormalizedError::from_status(response.status, response.body);
    match error.kind {
      ErrorKind::Unauthorized => self.handle_unauthorized(token.as_deref()),
      ErrorKind::Forbidden => self.events.emit(SessionEvent::Forbidden),
      _ => {}
    }
    warn!(%request, status = ?error.status, kind = %error.kind, "Request rejected");
    Err(error)
  }

  /// Clear the credential the request was sent with and signal once.
  fn handle_unauthorized(&self, token: Option<&str>) {
    if self.credentials.invalidate(token) {
      self.events.emit(SessionEvent::Unauthorized);
    }
  }
}
