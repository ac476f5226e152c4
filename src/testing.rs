//! Test doubles shared by the module tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportFailure};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportFailure> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
  pub request: ApiRequest,
  pub bearer: Option<String>,
}

/// Transport that answers from a closure and records every call.
pub struct ScriptedTransport {
  handler: Handler,
  delay: Option<Duration>,
  calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&ApiRequest) -> Result<ApiResponse, TransportFailure> + Send + Sync + 'static,
  {
    Self {
      handler: Box::new(handler),
      delay: None,
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Wait this long before answering each call.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn ok(body: Value) -> Result<ApiResponse, TransportFailure> {
    Ok(ApiResponse::new(200, body))
  }

  pub fn status(status: u16, body: Value) -> Result<ApiResponse, TransportFailure> {
    Ok(ApiResponse::new(status, body))
  }

  pub fn unreachable() -> Result<ApiResponse, TransportFailure> {
    Err(TransportFailure::Unreachable("connection refused".into()))
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  /// Targets of every call, in order.
  pub fn targets(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|c| c.request.target.clone())
      .collect()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn execute(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> Result<ApiResponse, TransportFailure> {
    self.calls.lock().unwrap().push(RecordedCall {
      request: request.clone(),
      bearer: bearer.map(String::from),
    });

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    (self.handler)(request)
  }
}
