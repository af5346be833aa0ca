use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFetcher;

/// Public key published by the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub decoding: DecodingKey,
}

impl SigningKey {
    pub fn new(key_id: impl Into<String>, algorithm: Algorithm, decoding: DecodingKey) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            decoding,
        }
    }

    pub fn rs256(key_id: impl Into<String>, decoding: DecodingKey) -> Self {
        Self::new(key_id, Algorithm::RS256, decoding)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Signing keys indexed by kid. Never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

impl FromIterator<SigningKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = SigningKey>>(iter: I) -> Self {
        Self {
            keys: iter
                .into_iter()
                .map(|key| (key.key_id.clone(), key))
                .collect(),
        }
    }
}

/// Where a fresh key set comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_keys(&self) -> AuthResult<KeySet>;
}

/// How long an expired snapshot is served as-is after a failed fetch.
pub const DEFAULT_FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(30);

struct CachedKeys {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

/// TTL cache over a [`KeySource`].
///
/// The snapshot is swapped as a whole, so readers see either the previous or
/// the new key set. At most one caller fetches at a time. While a snapshot
/// exists, expiry never blocks a request: whoever wins `refresh_lock` fetches
/// and everyone else keeps verifying against the expired keys. A failed fetch
/// is remembered so that later callers back off instead of refetching.
pub struct SigningKeyCache {
    source: Option<Arc<dyn KeySource>>,
    ttl: Duration,
    unknown_kid_refresh_interval: Duration,
    retry_backoff: Duration,
    cached: ArcSwapOption<CachedKeys>,
    last_failure: ArcSwapOption<Instant>,
    refresh_lock: Mutex<()>,
}

impl SigningKeyCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source: Some(source),
            ttl,
            unknown_kid_refresh_interval: Duration::from_secs(
                crate::config::DEFAULT_UNKNOWN_KID_REFRESH_SECS,
            ),
            retry_backoff: DEFAULT_FETCH_RETRY_BACKOFF,
            cached: ArcSwapOption::empty(),
            last_failure: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Cache for an identity provider that is not configured. Always empty.
    pub fn unconfigured() -> Self {
        Self {
            source: None,
            ttl: Duration::ZERO,
            unknown_kid_refresh_interval: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            cached: ArcSwapOption::empty(),
            last_failure: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> AuthResult<Self> {
        if !settings.provider_configured() {
            return Ok(Self::unconfigured());
        }
        let fetcher = JwksFetcher::with_timeout(settings.jwks_url(), settings.jwks_timeout)?;
        Ok(Self::new(Arc::new(fetcher), settings.jwks_cache_ttl)
            .with_unknown_kid_refresh_interval(settings.unknown_kid_refresh_interval))
    }

    pub fn with_unknown_kid_refresh_interval(mut self, interval: Duration) -> Self {
        self.unknown_kid_refresh_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Age of the current snapshot, if one was ever fetched.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.cached
            .load_full()
            .map(|cached| cached.fetched_at.elapsed())
    }

    /// Current key set.
    ///
    /// Without a snapshot, callers wait for a single fetch. With an expired
    /// snapshot, one caller refreshes and the rest get the expired keys at once.
    pub async fn get_keys(&self) -> AuthResult<Arc<KeySet>> {
        let Some(source) = self.source.as_ref() else {
            return Ok(Arc::new(KeySet::new()));
        };

        let Some(cached) = self.cached.load_full() else {
            return self.fetch_first(source.as_ref()).await;
        };
        if cached.fetched_at.elapsed() < self.ttl {
            return Ok(cached.keys.clone());
        }

        if self.failed_within(self.retry_backoff) {
            debug!("key set expired; last fetch failed recently, serving expired snapshot");
            return Ok(cached.keys.clone());
        }
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("key set expired; refresh in flight, serving expired snapshot");
            return Ok(cached.keys.clone());
        };
        if let Some(keys) = self.fresh_keys() {
            return Ok(keys);
        }
        self.fetch_and_swap(source.as_ref()).await
    }

    /// Fetch regardless of age. Falls back to the previous snapshot on failure.
    pub async fn refresh(&self) -> AuthResult<Arc<KeySet>> {
        let Some(source) = self.source.as_ref() else {
            return Ok(Arc::new(KeySet::new()));
        };
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_swap(source.as_ref()).await
    }

    /// Key set for verifying a token that declares `kid`.
    ///
    /// An unseen kid triggers one refresh when nothing was fetched or attempted
    /// within the unknown-kid interval, so a freshly rotated key is picked up
    /// before the TTL. Concurrent callers with unseen kids share that refresh.
    pub async fn keys_for(&self, kid: Option<&str>) -> AuthResult<Arc<KeySet>> {
        let keys = self.get_keys().await?;
        let Some(kid) = kid else {
            return Ok(keys);
        };
        let Some(source) = self.source.as_ref() else {
            return Ok(keys);
        };
        if keys.contains(kid) {
            return Ok(keys);
        }

        if !self.unknown_kid_refresh_due() {
            debug!(kid, "kid absent from recently fetched key set");
            return Ok(keys);
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.unknown_kid_refresh_due() {
            debug!(kid, "key set refreshed while waiting; not refetching");
            return Ok(self.current_keys().unwrap_or(keys));
        }

        info!(kid, "kid absent from cached key set; refreshing");
        self.fetch_and_swap(source.as_ref()).await
    }

    async fn fetch_first(&self, source: &dyn KeySource) -> AuthResult<Arc<KeySet>> {
        let waiting_since = Instant::now();
        let _guard = self.refresh_lock.lock().await;
        if let Some(keys) = self.current_keys() {
            return Ok(keys);
        }
        if self
            .last_failure
            .load_full()
            .is_some_and(|failed_at| *failed_at > waiting_since)
        {
            return Err(AuthError::ServiceUnavailable(
                "signing key fetch failed while waiting and no key set is cached".into(),
            ));
        }
        self.fetch_and_swap(source).await
    }

    fn current_keys(&self) -> Option<Arc<KeySet>> {
        self.cached.load_full().map(|cached| cached.keys.clone())
    }

    fn fresh_keys(&self) -> Option<Arc<KeySet>> {
        let cached = self.cached.load_full()?;
        if cached.fetched_at.elapsed() < self.ttl {
            Some(cached.keys.clone())
        } else {
            None
        }
    }

    fn failed_within(&self, window: Duration) -> bool {
        self.last_failure
            .load_full()
            .is_some_and(|failed_at| failed_at.elapsed() < window)
    }

    /// Time since the last fetch attempt, successful or not.
    fn since_last_attempt(&self) -> Option<Duration> {
        let fetched = self.snapshot_age();
        let failed = self.last_failure.load_full().map(|at| at.elapsed());
        match (fetched, failed) {
            (Some(fetched), Some(failed)) => Some(fetched.min(failed)),
            (fetched, failed) => fetched.or(failed),
        }
    }

    fn unknown_kid_refresh_due(&self) -> bool {
        self.since_last_attempt()
            .map(|age| age >= self.unknown_kid_refresh_interval)
            .unwrap_or(true)
    }

    async fn fetch_and_swap(&self, source: &dyn KeySource) -> AuthResult<Arc<KeySet>> {
        match source.fetch_keys().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                info!(count = keys.len(), "fetched signing keys");
                self.cached.store(Some(Arc::new(CachedKeys {
                    keys: keys.clone(),
                    fetched_at: Instant::now(),
                })));
                self.last_failure.store(None);
                Ok(keys)
            }
            Err(err) => {
                self.last_failure.store(Some(Arc::new(Instant::now())));
                match self.cached.load_full() {
                    Some(stale) => {
                        warn!(error = %err, age_secs = stale.fetched_at.elapsed().as_secs(), "signing key fetch failed; serving stale key set");
                        Ok(stale.keys.clone())
                    }
                    None => {
                        error!(error = %err, "signing key fetch failed and no key set is cached");
                        Err(AuthError::ServiceUnavailable(err.to_string()))
                    }
                }
            }
        }
    }
}
