//! Wire-level request and response shapes.
//!
//! Payloads are opaque JSON; the crate only cares about method, target,
//! status and body.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }

  /// Whether the method changes server state (and is therefore queueable).
  pub fn is_mutation(&self) -> bool {
    !matches!(self, Method::Get)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("unsupported HTTP method: {}", other)),
    }
  }
}

/// A request against the remote service. `target` is relative to the
/// configured base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
  pub method: Method,
  pub target: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub query: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, target: impl Into<String>) -> Self {
    Self {
      method,
      target: target.into(),
      query: BTreeMap::new(),
      body: None,
    }
  }

  pub fn get(target: impl Into<String>) -> Self {
    Self::new(Method::Get, target)
  }

  pub fn post(target: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Post, target).with_body(body)
  }

  pub fn put(target: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Put, target).with_body(body)
  }

  pub fn patch(target: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Patch, target).with_body(body)
  }

  pub fn delete(target: impl Into<String>) -> Self {
    Self::new(Method::Delete, target)
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
    self.query = query;
    self
  }
}

impl fmt::Display for ApiRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.target)
  }
}

/// Status and decoded body of a response. Empty bodies decode to
/// [`Value::Null`]; non-JSON bodies are kept as a string.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

impl ApiResponse {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Decode a raw body.
  pub fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Value::Null;
    }
    serde_json::from_slice(bytes)
      .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_method_parsing() {
    assert_eq!("post".parse::<Method>(), Ok(Method::Post));
    assert_eq!("DELETE".parse::<Method>(), Ok(Method::Delete));
    assert!("TRACE".parse::<Method>().is_err());
    assert!(!Method::Get.is_mutation());
    assert!(Method::Patch.is_mutation());
  }

  #[test]
  fn test_request_serializes_compactly() {
    let request = ApiRequest::post("/cart/items", json!({ "productId": "P1", "quantity": 2 }));
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(
      value,
      json!({
        "method": "POST",
        "target": "/cart/items",
        "body": { "productId": "P1", "quantity": 2 }
      })
    );
  }

  #[test]
  fn test_decode_body() {
    assert_eq!(ApiResponse::decode_body(b""), Value::Null);
    assert_eq!(ApiResponse::decode_body(b"  \n"), Value::Null);
    assert_eq!(ApiResponse::decode_body(br#"{"ok":true}"#), json!({ "ok": true }));
    assert_eq!(
      ApiResponse::decode_body(b"Bad Gateway"),
      Value::String("Bad Gateway".into())
    );
  }
}
