//! Serving strategies: network-first for backend calls, cache-first for assets.
//!
//! Both strategies take the network as an injected closure, the way the cache
//! layer they grew out of did, so they can be exercised against in-memory
//! fakes. Cache writes are best-effort throughout: a failing store degrades to
//! "proceed without caching", never to a failed user-visible request.

use chrono::Utc;
use color_eyre::Result;
use std::future::Future;
use tracing::{debug, warn};

use crate::fetch::{GatewayRequest, GatewayResponse, RequestMode};
use crate::policy::{ContentClass, ExpirationRules};
use crate::store::CacheStore;

/// Network-first handling for api-class requests.
///
/// 1. Try the network. A 200 is stamped and cached; the caller always gets
///    the original response back, stamped or not.
/// 2. On transport failure, serve the cached copy if it exists and is still
///    inside the api freshness window. Stale entries read the same as misses:
///    a synthetic 503.
pub async fn network_first<S, F, Fut>(
  store: &S,
  rules: &ExpirationRules,
  bucket: &str,
  request: &GatewayRequest,
  fetch: F,
) -> GatewayResponse
where
  S: CacheStore + ?Sized,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<GatewayResponse>>,
{
  let key = request.cache_key();

  match fetch().await {
    Ok(response) => {
      if response.status == 200 {
        let stamped = response.stamped(Utc::now());
        if let Err(e) = store.put(bucket, &key, &stamped) {
          warn!(url = %request.url, error = %e, "failed to cache api response");
        }
      }
      response
    }
    Err(e) => {
      debug!(url = %request.url, error = %e, "network failed, falling back to cache");
      serve_cached_api(store, rules, bucket, &key)
    }
  }
}

fn serve_cached_api<S>(store: &S, rules: &ExpirationRules, bucket: &str, key: &str) -> GatewayResponse
where
  S: CacheStore + ?Sized,
{
  let cached = match store.get(bucket, key) {
    Ok(Some(cached)) => cached,
    Ok(None) => return GatewayResponse::no_cached_data(),
    Err(e) => {
      warn!(error = %e, "cache read failed during fallback");
      return GatewayResponse::no_cached_data();
    }
  };

  // The capture stamp is the only freshness signal; a missing or unreadable
  // stamp counts as expired.
  match cached.captured_at() {
    Some(captured) if !rules.is_expired(ContentClass::Api, captured, Utc::now()) => cached,
    _ => GatewayResponse::no_cached_data(),
  }
}

/// Cache-first handling for asset-class requests.
///
/// A cached copy is served immediately with no staleness check and no network
/// round-trip; assets are cache-busted by filename, not by time. Misses fetch
/// and persist. Total failure serves the offline page to navigations and a
/// synthetic 408 to everything else.
pub async fn cache_first<S, F, Fut>(
  store: &S,
  bucket: &str,
  fallback_key: &str,
  request: &GatewayRequest,
  fetch: F,
) -> GatewayResponse
where
  S: CacheStore + ?Sized,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<GatewayResponse>>,
{
  let key = request.cache_key();

  match store.get(bucket, &key) {
    Ok(Some(cached)) => return cached,
    Ok(None) => {}
    Err(e) => warn!(url = %request.url, error = %e, "cache read failed, going to network"),
  }

  match fetch().await {
    Ok(response) => {
      if response.status == 200 {
        let stamped = response.stamped(Utc::now());
        if let Err(e) = store.put(bucket, &key, &stamped) {
          warn!(url = %request.url, error = %e, "failed to cache asset");
        }
      }
      response
    }
    Err(e) => {
      debug!(url = %request.url, error = %e, "asset fetch failed");
      if request.mode == RequestMode::Navigate {
        match store.get(bucket, fallback_key) {
          Ok(Some(fallback)) => fallback,
          _ => GatewayResponse::offline_page_missing(),
        }
      } else {
        GatewayResponse::asset_unreachable()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::request_key;
  use crate::store::MemoryStore;
  use chrono::Duration;
  use color_eyre::eyre::eyre;
  use reqwest::Method;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use url::Url;

  const API_BUCKET: &str = "api-v3";
  const APP_BUCKET: &str = "app-v3";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn rules() -> ExpirationRules {
    ExpirationRules::default()
  }

  fn seed_api(store: &MemoryStore, request: &GatewayRequest, body: &str, age_seconds: i64) {
    let stamped = GatewayResponse::new(200, "application/json", body)
      .stamped(Utc::now() - Duration::seconds(age_seconds));
    store.put(API_BUCKET, &request.cache_key(), &stamped).unwrap();
  }

  /// A store whose reads and writes always fail.
  struct FailingStore;

  impl CacheStore for FailingStore {
    fn put(&self, _: &str, _: &str, _: &GatewayResponse) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn get(&self, _: &str, _: &str) -> Result<Option<GatewayResponse>> {
      Err(eyre!("disk full"))
    }
    fn delete_bucket(&self, _: &str) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn list_buckets(&self) -> Result<Vec<String>> {
      Err(eyre!("disk full"))
    }
    fn entry_count(&self, _: &str) -> Result<u64> {
      Err(eyre!("disk full"))
    }
  }

  // ==========================================================================
  // Network-first
  // ==========================================================================

  #[tokio::test]
  async fn test_network_first_success_caches_stamped_copy() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Ok(GatewayResponse::new(200, "application/json", r#"{"jobs":[]}"#))
    })
    .await;

    // Caller sees the original, unstamped response
    assert_eq!(response.status, 200);
    assert!(response.captured_at().is_none());

    // The cache holds the stamped clone
    let cached = store.get(API_BUCKET, &request.cache_key()).unwrap().unwrap();
    assert_eq!(cached.body, response.body);
    assert!(cached.captured_at().is_some());
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_non_200() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Ok(GatewayResponse::new(404, "text/plain", "not found"))
    })
    .await;

    assert_eq!(response.status, 404);
    assert!(store.get(API_BUCKET, &request.cache_key()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_no_cache_yields_503() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Err(eyre!("connection refused"))
    })
    .await;

    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"Network error - no cached data available");
  }

  #[tokio::test]
  async fn test_network_first_fresh_cache_served_on_failure() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));
    seed_api(&store, &request, r#"{"jobs":[1]}"#, 120); // 2 minutes old, max age 300s

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Err(eyre!("connection refused"))
    })
    .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, br#"{"jobs":[1]}"#);
  }

  #[tokio::test]
  async fn test_network_first_stale_cache_reads_as_miss() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));
    seed_api(&store, &request, r#"{"jobs":[1]}"#, 600); // 10 minutes old

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Err(eyre!("connection refused"))
    })
    .await;

    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"Network error - no cached data available");
  }

  #[tokio::test]
  async fn test_network_first_missing_stamp_reads_as_miss() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));
    // Entry without a capture stamp
    let unstamped = GatewayResponse::new(200, "application/json", "{}");
    store.put(API_BUCKET, &request.cache_key(), &unstamped).unwrap();

    let response = network_first(&store, &rules(), API_BUCKET, &request, || async {
      Err(eyre!("connection refused"))
    })
    .await;

    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_store_failure_degrades_to_pass_through() {
    let request = GatewayRequest::get(url("https://app.example.com/api/jobs"));

    // Write failure: the response still reaches the caller
    let response = network_first(&FailingStore, &rules(), API_BUCKET, &request, || async {
      Ok(GatewayResponse::new(200, "application/json", "{}"))
    })
    .await;
    assert_eq!(response.status, 200);

    // Read failure during fallback: same 503 as a miss
    let response = network_first(&FailingStore, &rules(), API_BUCKET, &request, || async {
      Err(eyre!("connection refused"))
    })
    .await;
    assert_eq!(response.status, 503);
  }

  // ==========================================================================
  // Cache-first
  // ==========================================================================

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/static/app.css"));
    let cached = GatewayResponse::new(200, "text/css", "body{}");
    store.put(APP_BUCKET, &request.cache_key(), &cached).unwrap();

    let fetched = Arc::new(AtomicBool::new(false));
    let flag = fetched.clone();
    let response = cache_first(&store, APP_BUCKET, "fallback", &request, move || async move {
      flag.store(true, Ordering::SeqCst);
      Err(eyre!("should not be called"))
    })
    .await;

    assert_eq!(response.body, b"body{}");
    assert!(!fetched.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/static/app.js"));

    let response = cache_first(&store, APP_BUCKET, "fallback", &request, || async {
      Ok(GatewayResponse::new(200, "text/javascript", "console.log(1)"))
    })
    .await;

    assert_eq!(response.status, 200);
    let cached = store.get(APP_BUCKET, &request.cache_key()).unwrap().unwrap();
    assert_eq!(cached.body, b"console.log(1)");
  }

  #[tokio::test]
  async fn test_cache_first_navigation_failure_serves_offline_page() {
    let store = MemoryStore::new();
    let fallback_key = request_key(&Method::GET, &url("https://app.example.com/offline.html"));
    let offline = GatewayResponse::new(200, "text/html", "<h1>Offline</h1>");
    store.put(APP_BUCKET, &fallback_key, &offline).unwrap();

    let request = GatewayRequest::navigate(url("https://app.example.com/jobs/42"));
    let response = cache_first(&store, APP_BUCKET, &fallback_key, &request, || async {
      Err(eyre!("no network"))
    })
    .await;

    assert_eq!(response.body, b"<h1>Offline</h1>");
  }

  #[tokio::test]
  async fn test_cache_first_navigation_failure_without_offline_page() {
    let store = MemoryStore::new();
    let request = GatewayRequest::navigate(url("https://app.example.com/jobs/42"));

    let response = cache_first(&store, APP_BUCKET, "missing-fallback", &request, || async {
      Err(eyre!("no network"))
    })
    .await;

    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("text/html"));
  }

  #[tokio::test]
  async fn test_cache_first_subresource_failure_yields_408() {
    let store = MemoryStore::new();
    let request = GatewayRequest::get(url("https://app.example.com/static/app.css"));

    let response = cache_first(&store, APP_BUCKET, "fallback", &request, || async {
      Err(eyre!("no network"))
    })
    .await;

    assert_eq!(response.status, 408);
    assert_eq!(response.body, b"Network error happened");
  }
}
