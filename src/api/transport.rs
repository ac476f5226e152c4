//! Transport seam between the request pipeline and the network.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

use super::types::{ApiRequest, ApiResponse, Method};

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
  #[error("request timed out")]
  TimedOut,
  #[error("{0}")]
  Unreachable(String),
}

/// Sends one request and reports whatever came back. Non-success statuses are
/// responses, not failures; classification happens in the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> Result<ApiResponse, TransportFailure>;
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("storesync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Resolve a target against the base URL, keeping the base path.
  fn resolve(&self, request: &ApiRequest) -> Result<Url, TransportFailure> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      request.target.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
      .map_err(|e| TransportFailure::Unreachable(format!("invalid target {}: {}", joined, e)))?;

    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn classify(e: reqwest::Error) -> TransportFailure {
  if e.is_timeout() {
    TransportFailure::TimedOut
  } else {
    TransportFailure::Unreachable(e.to_string())
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> Result<ApiResponse, TransportFailure> {
    let url = self.resolve(request)?;

    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), url)
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = bearer {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    // Once a status has arrived the server has acted on the request, so a
    // broken body must not look like an unreachable server
    let body = match response.bytes().await {
      Ok(bytes) => ApiResponse::decode_body(&bytes),
      Err(e) => {
        warn!(status, error = %e, target = %request.target, "Failed to read response body");
        Value::Null
      }
    };

    Ok(ApiResponse::new(status, body))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::BTreeMap;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  fn transport(base: &str) -> HttpTransport {
    HttpTransport::new(Url::parse(base).unwrap(), Duration::from_secs(1)).unwrap()
  }

  #[test]
  fn test_resolve_keeps_base_path() {
    let t = transport("https://shop.example.com/api/v1/");
    let url = t.resolve(&ApiRequest::get("/orders")).unwrap();
    assert_eq!(url.as_str(), "https://shop.example.com/api/v1/orders");
  }

  #[test]
  fn test_resolve_appends_query() {
    let t = transport("https://shop.example.com/api");
    let mut query = BTreeMap::new();
    query.insert("page".to_string(), "2".to_string());
    query.insert("category".to_string(), "fruit".to_string());

    let url = t
      .resolve(&ApiRequest::get("products").with_query(query))
      .unwrap();
    assert_eq!(
      url.as_str(),
      "https://shop.example.com/api/products?category=fruit&page=2"
    );
  }

  #[tokio::test]
  async fn test_refused_connection_is_a_transport_failure() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let t = transport(&format!("http://127.0.0.1:{}", port));
    let result = t.execute(&ApiRequest::get("/orders"), None).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_truncated_body_keeps_status() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 1024];
      while !String::from_utf8_lossy(&request).ends_with("{\"sku\":\"P1\"}") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
      }
      // Promise 100 bytes, send 5, hang up
      socket
        .write_all(
          b"HTTP/1.1 201 Created\r\nContent-Length: 100\r\nContent-Type: application/json\r\n\r\n{\"id\"",
        )
        .await
        .unwrap();
    });

    let t = transport(&format!("http://127.0.0.1:{}", port));
    let request = ApiRequest::new(Method::Post, "/orders").with_body(json!({ "sku": "P1" }));
    let response = t.execute(&request, None).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body, Value::Null);
    server.await.unwrap();
  }
}
