//! Remote source backed by the GitHub REST API
//!
//! Fetches `GET {api}/users/{user}/keys` through a [`ResponseCache`] and
//! parses the returned keys concurrently, one task per key.

use bytes::Bytes;
use reqwest::header::{ACCEPT, CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::cache::{CachedResponse, ResponseCache, ResponseCacheConfig};
use super::{KeyRecord, KeyRepository, KeySource};
use crate::keys::PublicKey;
use crate::types::{KeywayError, Result};

/// Options for [`GitHubKeys`]
#[derive(Debug, Clone)]
pub struct GitHubKeysOptions {
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// API base URL
    pub api_url: String,
    /// Timeout for a single upstream request, including the body
    pub timeout: Duration,
    /// Cache byte bound, `0` disables caching
    pub max_cache_size: usize,
    /// Cache age bound in seconds, `0` never expires
    pub max_cache_age_secs: u64,
}

impl Default for GitHubKeysOptions {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            timeout: Duration::from_secs(1),
            max_cache_size: 25_000,
            max_cache_age_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubKey {
    key: String,
}

/// Resolves identities as GitHub usernames
pub struct GitHubKeys {
    client: Client,
    api_url: Url,
    token: Option<String>,
    cache: Arc<ResponseCache>,
}

impl GitHubKeys {
    pub fn new(options: GitHubKeysOptions) -> Result<Self> {
        let api_url = Url::parse(&options.api_url)
            .map_err(|e| KeywayError::Config(format!("invalid API URL {}: {}", options.api_url, e)))?;
        if api_url.cannot_be_a_base() {
            return Err(KeywayError::Config(format!(
                "API URL cannot be a base: {}",
                options.api_url
            )));
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("keyway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KeywayError::Config(format!("failed to build HTTP client: {}", e)))?;

        let cache = ResponseCache::new(ResponseCacheConfig::new(
            options.max_cache_size,
            options.max_cache_age_secs,
        ));

        Ok(Self {
            client,
            api_url,
            token: options.token.filter(|t| !t.is_empty()),
            cache: Arc::new(cache),
        })
    }

    /// The response cache, e.g. for spawning its cleanup task
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    fn keys_url(&self, username: &str) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["users", username, "keys"]);
        }
        url
    }

    /// Fetch the raw key listing. `None` means upstream has no such user.
    async fn fetch(&self, username: &str) -> Result<Option<Bytes>> {
        let url = self.keys_url(username);
        let cache_key = format!("GET {url}");

        let cached = self.cache.get(&cache_key);
        if let Some(hit) = cached.as_ref().filter(|c| c.is_fresh()) {
            return Ok(Some(hit.body.clone()));
        }

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(etag) = cached.as_ref().and_then(|c| c.etag.as_deref()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();
        let max_age = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);

        match status {
            StatusCode::NOT_MODIFIED => {
                let refreshed = self
                    .cache
                    .refresh(&cache_key, self.cache.freshness(max_age))
                    .or(cached)
                    .ok_or_else(|| {
                        KeywayError::Upstream("304 Not Modified without a cached response".into())
                    })?;
                debug!(identity = %username, "Upstream response revalidated");
                Ok(Some(refreshed.body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = response.bytes().await?;
                self.cache.insert(
                    &cache_key,
                    CachedResponse::new(body.clone(), etag, self.cache.freshness(max_age)),
                );
                Ok(Some(body))
            }
            s if s.is_success() => Ok(Some(response.bytes().await?)),
            s => Err(KeywayError::Upstream(format!(
                "GitHub returned {} for {}",
                s, username
            ))),
        }
    }
}

#[async_trait::async_trait]
impl KeyRepository for GitHubKeys {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        let Some(body) = self.fetch(username).await? else {
            return Err(KeywayError::NotFound(username.to_string()));
        };

        let listing: Vec<GitHubKey> = serde_json::from_slice(&body)?;
        let raw = listing.into_iter().map(|k| k.key).collect();
        let keys = parse_keys_parallel(raw).await.map_err(|e| {
            warn!(identity = %username, error = %e, "Upstream returned an unparseable key");
            e
        })?;

        debug!(identity = %username, count = keys.len(), "Loaded keys from GitHub");
        Ok(KeyRecord::new(KeySource::Remote, keys))
    }
}

/// Parse raw keys concurrently, one task per key.
///
/// Waits for every task. Returns the keys in input order if all parsed, or
/// the first reported error otherwise; later errors are dropped.
pub async fn parse_keys_parallel(raw: Vec<String>) -> Result<Vec<PublicKey>> {
    let (err_tx, mut err_rx) = mpsc::channel::<KeywayError>(1);
    let mut tasks = JoinSet::new();
    let count = raw.len();

    for (index, line) in raw.into_iter().enumerate() {
        let err_tx = err_tx.clone();
        tasks.spawn(async move {
            match PublicKey::parse_authorized_key(&line) {
                Ok(key) => Some((index, key)),
                Err(e) => {
                    let _ = err_tx.try_send(KeywayError::InvalidKey(format!("key {index}: {e}")));
                    None
                }
            }
        });
    }
    drop(err_tx);

    let mut slots: Vec<Option<PublicKey>> = vec![None; count];
    let mut join_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((index, key))) => slots[index] = Some(key),
            Ok(None) => {}
            Err(e) => {
                join_error.get_or_insert(KeywayError::Internal(format!("key parse task failed: {e}")));
            }
        }
    }

    if let Ok(e) = err_rx.try_recv() {
        return Err(e);
    }
    if let Some(e) = join_error {
        return Err(e);
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Extract `max-age` from a Cache-Control value
fn parse_max_age(value: &str) -> Option<Duration> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|secs| secs.trim_matches('"').parse().ok())
        .map(Duration::from_secs)
}
