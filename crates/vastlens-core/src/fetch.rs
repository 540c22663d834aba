//! Async VAST response fetching with caching, cooldown and request
//! coalescing. Compiled only with the `fetch` cargo feature.
//!
//! Fetching is strictly best-effort: every failure path yields `None`
//! so a missing ad response never fails an inspection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};
use url::Url;

/// How long a fetched response stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(600);

/// Window after a cache write during which a forced refresh is still
/// served from cache.
pub const REFRESH_COOLDOWN: Duration = Duration::from_secs(15);

/// Marks outgoing requests as inspector traffic.
const TEST_PARAMETER: (&str, &str) = ("adtest", "on");

/// Query keys that change on every request and must not split the
/// cache.
const DYNAMIC_PARAMETERS: &[&str] = &["correlator", "_", "timestamp"];

/// A fetched ad response body, stored uninterpreted.
#[derive(Debug, Clone)]
pub struct VastResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

struct CacheEntry {
    response: VastResponse,
    stored_at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Option<VastResponse>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// In-flight requests keyed by normalized URL; concurrent callers
    /// await the same future instead of issuing duplicate fetches.
    pending: HashMap<String, SharedFetch>,
}

impl CacheState {
    /// Decide whether a cached entry still answers this call.
    fn cached(&self, key: &str, force_refresh: bool) -> Option<VastResponse> {
        let entry = self.entries.get(key)?;
        let age = entry.stored_at.elapsed();
        if age >= CACHE_TTL {
            return None;
        }
        if force_refresh && age >= REFRESH_COOLDOWN {
            return None;
        }
        Some(entry.response.clone())
    }

    fn store(&mut self, key: String, response: VastResponse) {
        self.entries.insert(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
            },
        );
    }
}

/// Shared fetch cache handle; cloning is cheap and clones observe the
/// same cache.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    client: reqwest::Client,
    state: Mutex<CacheState>,
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchCache {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            inner: Arc::new(CacheInner {
                client,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Fetch the ad response for a tag URL, serving from cache when
    /// fresh. `force_refresh` bypasses the TTL but not the cooldown
    /// window.
    pub async fn fetch(&self, url: &str, force_refresh: bool) -> Option<VastResponse> {
        let key = normalize_cache_url(url);

        let shared = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(response) = state.cached(&key, force_refresh) {
                debug!(%key, "serving VAST response from cache");
                return Some(response);
            }
            if let Some(shared) = state.pending.get(&key) {
                debug!(%key, "joining in-flight VAST request");
                shared.clone()
            } else {
                let shared = request(self.inner.client.clone(), url.to_string())
                    .boxed()
                    .shared();
                state.pending.insert(key.clone(), shared.clone());
                shared
            }
        };

        let response = shared.await;

        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.pending.remove(&key);
        if let Some(response) = &response {
            state.store(key, response.clone());
        }
        response
    }
}

async fn request(client: reqwest::Client, url: String) -> Option<VastResponse> {
    let request_url = decorate_request_url(&url);
    debug!(url = %request_url, "fetching VAST response");
    let response = match client.get(&request_url).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %request_url, error = %err, "VAST request failed");
            return None;
        }
    };
    let status = response.status();
    if !status.is_success() {
        warn!(url = %request_url, %status, "VAST request returned an error status");
        return None;
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    match response.text().await {
        Ok(body) => Some(VastResponse {
            status: status.as_u16(),
            content_type,
            body,
        }),
        Err(err) => {
            warn!(url = %request_url, error = %err, "reading VAST response body failed");
            None
        }
    }
}

/// Cache key for a tag URL: the URL with its dynamic query parameters
/// removed, so rotating correlators and cache busters hit the same
/// entry. Unparsable URLs key on the raw string.
fn normalize_cache_url(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !DYNAMIC_PARAMETERS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed.set_query(None);
    if !kept.is_empty() {
        parsed.query_pairs_mut().extend_pairs(kept);
    }
    parsed.to_string()
}

/// Outgoing request URL: the tag URL with the inspector test parameter
/// and a fresh correlator appended.
fn decorate_request_url(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != TEST_PARAMETER.0 && key != "correlator")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed.set_query(None);
    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.extend_pairs(kept);
        pairs.append_pair(TEST_PARAMETER.0, TEST_PARAMETER.1);
        pairs.append_pair("correlator", &generate_correlator());
    }
    parsed.to_string()
}

/// Correlators only need to differ between page views; nanosecond
/// wall-clock time is plenty.
fn generate_correlator() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_nanos() % 10_000_000_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_dynamic_parameters() {
        let normalized = normalize_cache_url(
            "https://pubads.g.doubleclick.net/gampad/ads?iu=/1/a&correlator=123&_=456&timestamp=789&output=vast",
        );
        assert_eq!(
            normalized,
            "https://pubads.g.doubleclick.net/gampad/ads?iu=%2F1%2Fa&output=vast"
        );
    }

    #[test]
    fn normalization_is_stable_across_correlator_rotation() {
        let first = normalize_cache_url("https://example.com/ads?iu=/1/a&correlator=1");
        let second = normalize_cache_url("https://example.com/ads?iu=/1/a&correlator=99999");
        assert_eq!(first, second);
    }

    #[test]
    fn normalization_keeps_unparsable_urls_verbatim() {
        assert_eq!(normalize_cache_url("not a url"), "not a url");
    }

    #[test]
    fn decorated_request_carries_test_parameter_and_correlator() {
        let decorated =
            decorate_request_url("https://pubads.g.doubleclick.net/gampad/ads?iu=/1/a&correlator=");
        let parsed = Url::parse(&decorated).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        assert!(pairs.iter().any(|(key, value)| key == "adtest" && value == "on"));
        let correlator = pairs
            .iter()
            .find(|(key, _)| key == "correlator")
            .map(|(_, value)| value.clone())
            .expect("correlator");
        assert!(!correlator.is_empty());
        assert!(correlator.chars().all(|c| c.is_ascii_digit()));
        // The original empty correlator was replaced, not duplicated.
        assert_eq!(pairs.iter().filter(|(key, _)| key == "correlator").count(), 1);
    }

    #[test]
    fn fresh_entries_are_served_even_on_forced_refresh() {
        let mut state = CacheState::default();
        let response = VastResponse {
            status: 200,
            content_type: Some("text/xml".to_string()),
            body: "<VAST/>".to_string(),
        };
        state.store("key".to_string(), response);

        // Within both TTL and cooldown.
        assert!(state.cached("key", false).is_some());
        assert!(state.cached("key", true).is_some());
        assert!(state.cached("missing", false).is_none());
    }

    #[test]
    fn expired_entries_are_not_served() {
        let mut state = CacheState::default();
        let response = VastResponse {
            status: 200,
            content_type: None,
            body: String::new(),
        };
        state.store("key".to_string(), response);
        // Age the entry past the TTL.
        let Some(stored_at) = Instant::now().checked_sub(CACHE_TTL + Duration::from_secs(1)) else {
            return;
        };
        state.entries.get_mut("key").unwrap().stored_at = stored_at;
        assert!(state.cached("key", false).is_none());
    }

    #[test]
    fn forced_refresh_after_cooldown_bypasses_the_cache() {
        let mut state = CacheState::default();
        let response = VastResponse {
            status: 200,
            content_type: None,
            body: String::new(),
        };
        state.store("key".to_string(), response);
        let Some(stored_at) =
            Instant::now().checked_sub(REFRESH_COOLDOWN + Duration::from_secs(1))
        else {
            return;
        };
        state.entries.get_mut("key").unwrap().stored_at = stored_at;
        // Still within the TTL, so a plain read hits the cache while a
        // forced refresh does not.
        assert!(state.cached("key", false).is_some());
        assert!(state.cached("key", true).is_none());
    }

    #[tokio::test]
    async fn failed_fetches_yield_none() {
        let cache = FetchCache::new();
        // Port 9 (discard) refuses the connection immediately.
        let response = cache
            .fetch("http://127.0.0.1:9/gampad/ads?iu=/1/a", false)
            .await;
        assert!(response.is_none());
    }
}
