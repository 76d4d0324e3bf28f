pub mod error;
pub mod key;
pub mod memory;
pub mod shared;

use serde::{Deserialize, Serialize};

pub use error::StoreError;
pub use key::NonceKey;
pub use memory::MemoryNonceStore;
pub use redis;
pub use shared::RedisNonceStore;

/// Atomic counter storage for per-account nonces.
///
/// The stored value is the last nonce issued for a key. Implementations must
/// make `increment` atomic: two concurrent increments of the same key never
/// observe the same post-increment value.
pub trait NonceStore: Send + Sync {
    /// Current value for the key, `None` if it was never written
    fn get(&self, key: &NonceKey) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Overwrite the value for the key
    fn set(&self, key: &NonceKey, value: i64)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write `value` only if the key holds nothing yet, atomically.
    /// Returns whether the write happened; a live counter is left untouched.
    fn set_if_absent(
        &self,
        key: &NonceKey,
        value: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Add `delta` to the value and return the post-increment value.
    /// An absent key counts as 0.
    fn increment(
        &self,
        key: &NonceKey,
        delta: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Write `new` only if the current value equals `expected`, atomically.
    /// Returns whether the write happened.
    fn compare_and_set(
        &self,
        key: &NonceKey,
        expected: i64,
        new: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Which backend holds the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map, valid for a single process only
    #[default]
    Memory,
    /// Shared redis counter for multi-process deployments
    Redis {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
    },
}

/// Backend chosen at runtime from [`StoreConfig`].
#[derive(Clone)]
pub enum AnyNonceStore {
    Memory(MemoryNonceStore),
    Redis(RedisNonceStore),
}

impl AnyNonceStore {
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match config {
            StoreConfig::Memory => {
                tracing::debug!("Using in-process nonce store");
                Ok(Self::Memory(MemoryNonceStore::new()))
            }
            StoreConfig::Redis { url, namespace } => {
                let store = RedisNonceStore::connect(url, namespace.clone()).await?;
                tracing::info!(namespace = ?namespace, "Connected shared redis nonce store");
                Ok(Self::Redis(store))
            }
        }
    }
}

impl NonceStore for AnyNonceStore {
    async fn get(&self, key: &NonceKey) -> Result<Option<i64>, StoreError> {
        match self {
            Self::Memory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &NonceKey, value: i64) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set(key, value).await,
            Self::Redis(store) => store.set(key, value).await,
        }
    }

    async fn set_if_absent(&self, key: &NonceKey, value: i64) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.set_if_absent(key, value).await,
            Self::Redis(store) => store.set_if_absent(key, value).await,
        }
    }

    async fn increment(&self, key: &NonceKey, delta: i64) -> Result<i64, StoreError> {
        match self {
            Self::Memory(store) => store.increment(key, delta).await,
            Self::Redis(store) => store.increment(key, delta).await,
        }
    }

    async fn compare_and_set(
        &self,
        key: &NonceKey,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.compare_and_set(key, expected, new).await,
            Self::Redis(store) => store.compare_and_set(key, expected, new).await,
        }
    }
}
