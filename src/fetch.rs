//! Request/response types and the network fetch port.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::future::Future;
use url::Url;

/// Header recording when a cached response was captured (UTC, RFC 3339).
///
/// This header is the sole signal the expiration check reads; upstream
/// Cache-Control directives are ignored.
pub const CAPTURED_AT_HEADER: &str = "x-tradegate-captured-at";

/// How a request was issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full page navigation; offline failures fall back to the offline page
  Navigate,
  /// Anything else (asset, XHR, image, font)
  Subresource,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl GatewayRequest {
  /// A plain GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A page navigation request.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// Stable cache key for this request.
  pub fn cache_key(&self) -> String {
    request_key(&self.method, &self.url)
  }
}

/// Stable, fixed-length key for a (method, URL) pair.
pub fn request_key(method: &Method, url: &Url) -> String {
  let input = format!("{} {}", method, url);
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// A response flowing back to the client, from network, cache, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl GatewayResponse {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("content-type".into(), content_type.into())],
      body: body.into(),
    }
  }

  /// Synthetic 503 for api requests with no usable cached copy.
  pub fn no_cached_data() -> Self {
    Self::new(503, "text/plain", "Network error - no cached data available")
  }

  /// Synthetic 503 page for navigations when even the offline page is missing.
  pub fn offline_page_missing() -> Self {
    Self::new(503, "text/html", "Offline")
  }

  /// Synthetic 408 for unreachable non-navigation assets.
  pub fn asset_unreachable() -> Self {
    Self::new(408, "text/plain", "Network error happened")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Copy of this response stamped with a capture timestamp.
  ///
  /// Replaces any stamp already present so re-captures never carry two.
  pub fn stamped(&self, captured_at: DateTime<Utc>) -> Self {
    let mut stamped = self.clone();
    stamped
      .headers
      .retain(|(n, _)| !n.eq_ignore_ascii_case(CAPTURED_AT_HEADER));
    stamped
      .headers
      .push((CAPTURED_AT_HEADER.into(), captured_at.to_rfc3339()));
    stamped
  }

  /// Capture timestamp recorded on this response, if any.
  pub fn captured_at(&self) -> Option<DateTime<Utc>> {
    self
      .header(CAPTURED_AT_HEADER)
      .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
      .map(|dt| dt.with_timezone(&Utc))
  }
}

/// Network port the gateway dispatches through.
///
/// Implemented by [`HttpFetcher`] for real traffic and by canned fakes in
/// tests; the owned request keeps spawned handler tasks free of borrows.
pub trait Fetch: Clone + Send + Sync + 'static {
  fn fetch(
    &self,
    request: GatewayRequest,
  ) -> impl Future<Output = Result<GatewayResponse>> + Send + 'static;
}

/// Network port backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl Fetch for HttpFetcher {
  fn fetch(
    &self,
    request: GatewayRequest,
  ) -> impl Future<Output = Result<GatewayResponse>> + Send + 'static {
    let fetcher = self.clone();
    async move { fetcher.send(&request).await }
  }
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Forward a request to the network as-is.
  ///
  /// The body is fully received before this returns Ok, so callers never
  /// persist a partially-read response.
  pub async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
    let mut builder = self.client.request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(GatewayResponse {
      status,
      headers,
      body,
    })
  }

  /// GET a URL (install pre-warming).
  pub async fn get(&self, url: &Url) -> Result<GatewayResponse> {
    self.send(&GatewayRequest::get(url.clone())).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_request_key_is_deterministic() {
    let a = request_key(&Method::GET, &url("https://app.example.com/api/jobs"));
    let b = request_key(&Method::GET, &url("https://app.example.com/api/jobs"));
    assert_eq!(a, b);
  }

  #[test]
  fn test_request_key_distinguishes_method_and_url() {
    let get = request_key(&Method::GET, &url("https://app.example.com/api/jobs"));
    let post = request_key(&Method::POST, &url("https://app.example.com/api/jobs"));
    let other = request_key(&Method::GET, &url("https://app.example.com/api/invoices"));
    assert_ne!(get, post);
    assert_ne!(get, other);
  }

  #[test]
  fn test_capture_stamp_round_trip() {
    let response = GatewayResponse::new(200, "application/json", "{}");
    assert!(response.captured_at().is_none());

    let now = Utc::now();
    let stamped = response.stamped(now);
    let read_back = stamped.captured_at().unwrap();
    assert_eq!(read_back.timestamp(), now.timestamp());
  }

  #[test]
  fn test_restamping_replaces_old_stamp() {
    let first = Utc::now() - chrono::Duration::minutes(10);
    let second = Utc::now();
    let stamped = GatewayResponse::new(200, "application/json", "{}")
      .stamped(first)
      .stamped(second);

    let stamps: Vec<_> = stamped
      .headers
      .iter()
      .filter(|(n, _)| n.eq_ignore_ascii_case(CAPTURED_AT_HEADER))
      .collect();
    assert_eq!(stamps.len(), 1);
    assert_eq!(stamped.captured_at().unwrap().timestamp(), second.timestamp());
  }

  #[test]
  fn test_synthetic_responses() {
    let missing = GatewayResponse::no_cached_data();
    assert_eq!(missing.status, 503);
    assert_eq!(missing.body, b"Network error - no cached data available");

    let offline = GatewayResponse::offline_page_missing();
    assert_eq!(offline.status, 503);
    assert_eq!(offline.header("content-type"), Some("text/html"));

    let asset = GatewayResponse::asset_unreachable();
    assert_eq!(asset.status, 408);
    assert_eq!(asset.body, b"Network error happened");
  }
}
