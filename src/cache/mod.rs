mod memory;

pub use memory::InMemoryCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,

    #[error("cache backend failure: {0}")]
    Backend(String),
}

/// Key-value store with per-entry TTL. The reader is the primary caller; the trait is the
/// seam an out-of-process backend (e.g. Redis) would fill in, but that implementation is
/// external to this core -- [`InMemoryCache`] is the default and only shipped impl.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Atomically increments a counter at `key`, creating it with the given `ttl` if
    /// absent, and returns the post-increment value. Used for rate counters.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;
}

/// Helper built on top of [`CacheStore`] for components that cache `serde`-serializable
/// values rather than raw bytes.
pub struct TypedCache<'a> {
    store: &'a dyn CacheStore,
}

impl<'a> TypedCache<'a> {
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self { store }
    }

    pub async fn get<T: serde::de::DeserializeOwned>(
        &self, key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.store.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|err| CacheError::Backend(err.to_string()))?;
                Ok(Some(value))
            },
            None => Ok(None),
        }
    }

    pub async fn set<T: serde::Serialize + Sync>(
        &self, key: &str, value: &T, ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|err| CacheError::Backend(err.to_string()))?;
        self.store.set(key, bytes, ttl).await
    }
}
