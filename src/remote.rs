use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use derive_builder::Builder;
use jsonwebtoken::{jwk::JwkSet, DecodingKey, Header};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::verifier::KeyFetcher;
use crate::Error;

const DEFAULT_CACHE_DURATION: std::time::Duration = std::time::Duration::from_secs(60 * 60); // 1 hour
const DEFAULT_RETRY_COUNT: usize = 3; // 3 attempts
const DEFAULT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1); // 1 second
const DEFAULT_MIN_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, Builder)]
pub struct RemoteJwksConfig {
    /// How long to cache the JWKS keys for
    #[builder(default = "DEFAULT_CACHE_DURATION")]
    pub cache_duration: std::time::Duration,
    /// How many times to try fetching the JWKS keys before giving up
    #[builder(default = "DEFAULT_RETRY_COUNT")]
    pub retry_count: usize,
    /// How long to wait before retrying fetching the JWKS keys
    #[builder(default = "DEFAULT_BACKOFF")]
    pub backoff: std::time::Duration,
    /// Minimum time between two refreshes triggered by an unknown `kid`
    #[builder(default = "DEFAULT_MIN_REFRESH_INTERVAL")]
    pub min_refresh_interval: std::time::Duration,
}

impl Default for RemoteJwksConfig {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            retry_count: DEFAULT_RETRY_COUNT,
            backoff: DEFAULT_BACKOFF,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

/// Key fetcher backed by a remote JWKS endpoint.
///
/// Keys are cached by `kid`. The set is fetched on first use, again when a
/// token names a `kid` that is not cached (key rotation), and periodically if
/// [`RemoteJwks::refresh_keys_periodically`] is running.
///
/// Refreshes caused by cache misses run one at a time and at most once per
/// [`RemoteJwksConfig::min_refresh_interval`]; tokens with an unknown `kid`
/// arriving in between are rejected without another fetch.
#[derive(Clone, Builder)]
pub struct RemoteJwks {
    /// The URL to fetch the JWKS from
    #[builder(setter(into))]
    jwks_url: String,
    /// The configuration for the fetcher
    #[builder(default = "RemoteJwksConfig::default()")]
    config: RemoteJwksConfig,
    /// The cache for the JWKS keys
    #[builder(default = "Arc::new(DashMap::new())")]
    keys_cache: Arc<DashMap<String, DecodingKey>>,
    /// The HTTP client to use for fetching the JWKS
    #[builder(default = "reqwest::Client::new()")]
    client: reqwest::Client,
    /// Serializes refresh-on-miss and remembers when it last ran
    #[builder(setter(skip))]
    refresh_gate: Arc<Mutex<Option<Instant>>>,
}

impl RemoteJwks {
    /// Creates a new [`RemoteJwks`] with the given JWKS URL and default settings.
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            config: RemoteJwksConfig::default(),
            keys_cache: Arc::new(DashMap::new()),
            client: reqwest::Client::new(),
            refresh_gate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn builder() -> RemoteJwksBuilder {
        RemoteJwksBuilder::default()
    }

    /// Refreshes the JWKS cache.
    /// It tries up to [`RemoteJwksConfig::retry_count`] times,
    /// waiting [`RemoteJwksConfig::backoff`] between attempts.
    /// If every attempt fails, it returns the last error.
    pub async fn refresh_keys(&self) -> Result<(), Error> {
        let max_attempts = self.config.retry_count.max(1);
        let mut attempt = 0;

        loop {
            match self.refresh_keys_once().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    tracing::debug!("JWKS fetch attempt {} failed: {:?}", attempt, e);
                    tokio::time::sleep(self.config.backoff).await;
                }
            }
        }
    }

    /// Refreshes the JWKS cache once.
    /// It fetches the JWKS from the given URL and caches the keys.
    async fn refresh_keys_once(&self) -> Result<(), Error> {
        let jwks = self
            .client
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;

        // Parse all keys first before clearing cache
        let mut new_keys = Vec::new();
        for jwk in jwks.keys.iter() {
            let key_id = jwk.common.key_id.to_owned();
            let key = DecodingKey::from_jwk(jwk)?;
            new_keys.push((key_id.unwrap_or_default(), key));
        }

        // Only clear and update cache after all keys parsed successfully
        self.keys_cache.clear();
        for (kid, key) in new_keys {
            self.keys_cache.insert(kid, key);
        }

        Ok(())
    }

    /// Refreshes the JWKS cache periodically.
    /// It runs in a loop and never returns, so it should be run in a separate tokio task
    /// using `tokio::spawn`. If the JWKS refresh fails after multiple attempts,
    /// it logs the error and continues with the stale keys until the next refresh succeeds.
    pub async fn refresh_keys_periodically(&self) {
        loop {
            tracing::info!("Refreshing JWKS");
            if let Err(err) = self.refresh_keys().await {
                tracing::error!(
                    "Failed to refresh JWKS after {} attempts: {:?}",
                    self.config.retry_count,
                    err
                );
            }
            tokio::time::sleep(self.config.cache_duration).await;
        }
    }

    fn cached_key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys_cache.get(kid).map(|key| key.value().clone()),
            // Without a kid the choice is only unambiguous for a single-key set
            None if self.keys_cache.len() == 1 => {
                self.keys_cache.iter().next().map(|key| key.value().clone())
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyFetcher for RemoteJwks {
    async fn fetch(&self, header: &Header) -> Result<DecodingKey, Error> {
        let kid = header.kid.as_deref();

        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }

        // Unknown kid or empty cache: the set may have rotated since the last fetch.
        // Concurrent misses wait here and reuse the keys the first one fetched.
        let mut last_refresh = self.refresh_gate.lock().await;
        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }

        let due = last_refresh.map_or(true, |at| at.elapsed() >= self.config.min_refresh_interval);
        if !due {
            tracing::debug!("Skipping JWKS refresh for kid {:?}, last refresh was too recent", kid);
            return Err(Error::KeyNotFound(header.kid.clone()));
        }

        *last_refresh = Some(Instant::now());
        self.refresh_keys().await?;

        self.cached_key(kid)
            .ok_or_else(|| Error::KeyNotFound(header.kid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemoteJwksConfigBuilder::default().build().unwrap();
        assert_eq!(config.cache_duration, DEFAULT_CACHE_DURATION);
        assert_eq!(config.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(config.backoff, DEFAULT_BACKOFF);
        assert_eq!(config.min_refresh_interval, DEFAULT_MIN_REFRESH_INTERVAL);
    }

    #[test]
    fn test_builder_requires_url() {
        assert!(RemoteJwks::builder().build().is_err());
        assert!(RemoteJwks::builder()
            .jwks_url("https://example.com/.well-known/jwks.json")
            .build()
            .is_ok());
    }

    #[test]
    fn test_cached_key_lookup() {
        let jwks = RemoteJwks::new("https://example.com/.well-known/jwks.json");
        assert!(jwks.cached_key(None).is_none());

        jwks.keys_cache
            .insert("one".to_string(), DecodingKey::from_secret(b"one"));
        assert!(jwks.cached_key(Some("one")).is_some());
        assert!(jwks.cached_key(Some("two")).is_none());
        assert!(jwks.cached_key(None).is_some());

        jwks.keys_cache
            .insert("two".to_string(), DecodingKey::from_secret(b"two"));
        assert!(jwks.cached_key(None).is_none());
    }

    #[tokio::test]
    async fn test_recent_refresh_skips_fetch() {
        // Nothing listens here; a fetch attempt would fail with a reqwest error
        let jwks = RemoteJwks::new("http://127.0.0.1:9/.well-known/jwks.json");
        *jwks.refresh_gate.lock().await = Some(Instant::now());

        let mut header = Header::default();
        header.kid = Some("unknown".to_string());
        let err = jwks.fetch(&header).await.err().expect("expected fetch to fail");
        assert!(matches!(err, Error::KeyNotFound(Some(ref kid)) if kid == "unknown"));

        jwks.keys_cache
            .insert("unknown".to_string(), DecodingKey::from_secret(b"late"));
        assert!(jwks.fetch(&header).await.is_ok());
    }
}
