//! Transport seam between the engine and the HTTP stack.
//!
//! The trait carries exactly what the sync protocol needs: a verb, a
//! server-relative path, an optional JSON body and an optional
//! conditional-read validator going out; a status, an optional fresh
//! validator and an optional JSON body coming back. `Err` from
//! [`Transport::send`] means the request never produced a response
//! (unreachable host, timeout); HTTP error statuses come back as `Ok`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use url::Url;

/// HTTP verbs the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  /// Parse a verb stored in the write queue.
  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      other => Err(eyre!("Unknown HTTP method in queue: {}", other)),
    }
  }
}

/// A request as the engine sees it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  /// Conditional-read validator, sent as If-None-Match.
  pub if_none_match: Option<String>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      path: path.into(),
      body,
      if_none_match: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path, None)
  }

  pub fn with_validator(mut self, validator: Option<String>) -> Self {
    self.if_none_match = validator;
    self
  }
}

/// Status, validator and parsed body of a server response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub etag: Option<String>,
  pub body: Option<Value>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_not_modified(&self) -> bool {
    self.status == 304
  }

  pub fn is_client_error(&self) -> bool {
    (400..500).contains(&self.status)
  }
}

/// Object-safe seam so tests can script server behavior and embedders
/// can swap the HTTP stack.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Production transport over reqwest. Every outgoing request carries
/// the bearer credential; this layer never refreshes it.
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: String,
}

impl HttpTransport {
  pub fn new(base_url: &str, token: String) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid server URL {}: {}", base_url, e))?;

    // Url::join treats a base without a trailing slash as a file, which
    // would drop the last path segment.
    if !base_url.path().ends_with('/') {
      base_url.set_path(&format!("{}/", base_url.path()));
    }

    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
      token,
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
    let url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request path {}: {}", request.path, e))?;

    let mut builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };

    builder = builder.bearer_auth(&self.token);

    if let Some(validator) = &request.if_none_match {
      builder = builder.header(reqwest::header::IF_NONE_MATCH, validator);
    }

    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.path, e))?;

    let status = response.status().as_u16();
    let etag = response
      .headers()
      .get(reqwest::header::ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    // 204 and 304 carry no body; error bodies may not be JSON at all.
    let body = if status == 204 || status == 304 {
      None
    } else {
      response.json::<Value>().await.ok()
    };

    Ok(ApiResponse { status, etag, body })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_roundtrip() {
    for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
      assert_eq!(Method::parse(method.as_str()).unwrap(), method);
    }
    assert!(Method::parse("PATCH").is_err());
  }

  #[test]
  fn test_base_url_keeps_its_path_prefix() {
    let transport = HttpTransport::new("https://api.example.com/v1", "token".into()).unwrap();
    let url = transport.base_url.join("tasks").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/v1/tasks");
  }

  #[test]
  fn test_status_classes() {
    let ok = ApiResponse { status: 204, etag: None, body: None };
    assert!(ok.is_success());

    let not_modified = ApiResponse { status: 304, etag: None, body: None };
    assert!(not_modified.is_not_modified());
    assert!(!not_modified.is_success());

    let rejected = ApiResponse { status: 422, etag: None, body: None };
    assert!(rejected.is_client_error());
  }
}
