//! Advisory key/value cache with per-entry expiry.
//!
//! Every read may be treated as a miss and every write may be skipped. The
//! [`Cache`] handle enforces that: backend failures are logged and turned into
//! misses or no-ops, so callers never see a `CacheError`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Shared handle to an optional cache store.
#[derive(Clone, Default)]
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A cache that misses on every read and drops every write.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        match config.effective_backend() {
            CacheBackend::None => {
                info!("cache disabled");
                Self::disabled()
            }
            CacheBackend::Memory => {
                info!("using in-process memory cache");
                Self::new(Arc::new(MemoryCache::new()))
            }
            CacheBackend::Redis => match config.effective_redis_url() {
                Some(url) => match RedisCache::open(&url, &config.key_prefix) {
                    Ok(store) => Self::new(Arc::new(
                        store.with_timeouts(config.timeout(), config.retry_after()),
                    )),
                    Err(err) => {
                        warn!("invalid redis URL, caching disabled: {err}");
                        Self::disabled()
                    }
                },
                None => {
                    warn!("cache backend is redis but no redis_url or REDIS_URL is set");
                    Self::disabled()
                }
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("cache read failed, treating as miss: {err}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(err) = store.set(key, value, ttl).await {
            warn!("cache write skipped: {err}");
        }
    }
}

/// Redis-backed store. The connection is opened on first use and reused for
/// the life of the process. Connects and commands are bounded by `timeout`;
/// after a failed connect the store reports unavailable for `retry_after`
/// instead of dialing again on every call.
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    timeout: Duration,
    retry_after: Duration,
    failed_at: Mutex<Option<Instant>>,
}

impl RedisCache {
    pub fn open(url: &str, key_prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::Connect)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: key_prefix.to_string(),
            timeout: Duration::from_millis(500),
            retry_after: Duration::from_secs(30),
            failed_at: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeout: Duration, retry_after: Duration) -> Self {
        self.timeout = timeout;
        self.retry_after = retry_after;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                // Waiters queued behind a failed connect land here too.
                self.check_cooldown()?;
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(0)
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout);
                match self.client.get_connection_manager_with_config(config).await {
                    Ok(manager) => {
                        info!("connected to redis");
                        *self.failed_at() = None;
                        Ok(manager)
                    }
                    Err(err) => {
                        warn!(
                            "redis connect failed, skipping cache for {:?}",
                            self.retry_after
                        );
                        *self.failed_at() = Some(Instant::now());
                        Err(CacheError::Connect(err))
                    }
                }
            })
            .await?;
        Ok(manager.clone())
    }

    fn check_cooldown(&self) -> Result<(), CacheError> {
        match *self.failed_at() {
            Some(failed_at) if failed_at.elapsed() < self.retry_after => {
                Err(CacheError::Unavailable(failed_at.elapsed()))
            }
            _ => Ok(()),
        }
    }

    fn failed_at(&self) -> MutexGuard<'_, Option<Instant>> {
        self.failed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let key = self.prefixed(key);
        let result: redis::RedisResult<Option<String>> = conn.get(&key).await;
        result.map_err(|source| CacheError::Command {
            op: "GET",
            key,
            source,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let key = self.prefixed(key);
        let result: redis::RedisResult<()> = conn.set_ex(&key, value, ttl.as_secs().max(1)).await;
        result.map_err(|source| CacheError::Command {
            op: "SETEX",
            key,
            source,
        })
    }
}

/// Writes between sweeps of expired entries.
const SWEEP_EVERY: u32 = 64;

/// In-process store. Expired entries are evicted on read and swept
/// periodically on write.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    writes: AtomicU32,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                debug!("memory cache entry expired: {key}");
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.lock();
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let before = entries.len();
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            debug!("memory cache swept {} expired entries", before - entries.len());
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}
