//! Request classification: which caching strategy, if any, applies.

use reqwest::Method;
use url::Url;

use crate::config::RoutesConfig;
use crate::fetch::GatewayRequest;

/// Strategy class for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Pass straight through to the network, no cache involvement
  Bypass,
  /// Backend call: network-first with short-lived cache fallback
  Api,
  /// Same-origin static content: cache-first
  Asset,
}

/// Classify a request from its method, origin, and path alone.
///
/// Runs before any cache or network I/O so mutating and credential-bearing
/// calls never touch the cache.
pub fn classify(request: &GatewayRequest, origin: &Url, routes: &RoutesConfig) -> RequestClass {
  // Mutations always go to the network unmodified
  if request.method != Method::GET {
    return RequestClass::Bypass;
  }

  let scheme = request.url.scheme();
  if scheme != "http" && scheme != "https" {
    return RequestClass::Bypass;
  }

  if request.url.origin() != origin.origin() {
    return RequestClass::Bypass;
  }

  let path = request.url.path();
  if routes.api_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
    return RequestClass::Api;
  }

  let path_lower = path.to_lowercase();
  if routes.api_markers.iter().any(|m| path_lower.contains(m.as_str())) {
    return RequestClass::Api;
  }

  RequestClass::Asset
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://app.example.com").unwrap()
  }

  fn request(method: Method, url: &str) -> GatewayRequest {
    GatewayRequest {
      method,
      ..GatewayRequest::get(Url::parse(url).unwrap())
    }
  }

  fn class(method: Method, url: &str) -> RequestClass {
    classify(&request(method, url), &origin(), &RoutesConfig::default())
  }

  #[test]
  fn test_non_get_bypasses() {
    assert_eq!(class(Method::POST, "https://app.example.com/api/jobs"), RequestClass::Bypass);
    assert_eq!(class(Method::PUT, "https://app.example.com/api/jobs/1"), RequestClass::Bypass);
    assert_eq!(class(Method::DELETE, "https://app.example.com/api/jobs/1"), RequestClass::Bypass);
  }

  #[test]
  fn test_cross_origin_bypasses() {
    assert_eq!(class(Method::GET, "https://cdn.example.net/lib.js"), RequestClass::Bypass);
    // Different scheme is a different origin too
    assert_eq!(class(Method::GET, "http://app.example.com/api/jobs"), RequestClass::Bypass);
  }

  #[test]
  fn test_non_http_scheme_bypasses() {
    let req = request(Method::GET, "chrome-extension://abcdef/script.js");
    assert_eq!(
      classify(&req, &origin(), &RoutesConfig::default()),
      RequestClass::Bypass
    );
  }

  #[test]
  fn test_api_prefixes() {
    assert_eq!(class(Method::GET, "https://app.example.com/api/jobs"), RequestClass::Api);
    assert_eq!(class(Method::GET, "https://app.example.com/portal/invoices"), RequestClass::Api);
  }

  #[test]
  fn test_api_marker_matches_anywhere_in_path() {
    assert_eq!(
      class(Method::GET, "https://app.example.com/functions/Supabase/rest/v1/jobs"),
      RequestClass::Api
    );
  }

  #[test]
  fn test_everything_else_is_asset() {
    assert_eq!(class(Method::GET, "https://app.example.com/"), RequestClass::Asset);
    assert_eq!(class(Method::GET, "https://app.example.com/static/app.css"), RequestClass::Asset);
    assert_eq!(class(Method::GET, "https://app.example.com/jobs/42"), RequestClass::Asset);
  }

  #[test]
  fn test_classification_is_deterministic() {
    for _ in 0..3 {
      assert_eq!(class(Method::GET, "https://app.example.com/api/jobs"), RequestClass::Api);
    }
  }
}
