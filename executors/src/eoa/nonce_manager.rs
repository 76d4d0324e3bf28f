use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::OnceCell;
use txretry_core::{
    chain::{BlockTag, ChainClient},
    error::EngineError,
};
use txretry_store::{NonceKey, NonceStore, StoreError};

#[derive(Debug, Error)]
pub enum NonceManagerError {
    #[error("Nonce store error: {0}")]
    Store(#[from] StoreError),

    #[error("Nonce counter {key} used before initialization")]
    NotInitialized { key: NonceKey },

    #[error("Nonce counter {key} holds negative value {value}")]
    NegativeNonce { key: NonceKey, value: i64 },

    #[error(transparent)]
    Chain(#[from] EngineError),
}

impl From<NonceManagerError> for EngineError {
    fn from(err: NonceManagerError) -> Self {
        match err {
            NonceManagerError::Chain(inner) => inner,
            other => EngineError::InternalError {
                message: other.to_string(),
            },
        }
    }
}

/// Issues nonces for (account, chain) counters held in a [`NonceStore`].
///
/// Each counter stores the last nonce handed out. It is seeded from the
/// chain's confirmed transaction count the first time a key is used, exactly
/// once per coordinator even with many concurrent first callers. A counter
/// already present in the store is adopted as is, so coordinators sharing a
/// store never rewind each other.
pub struct NonceCoordinator<S> {
    store: S,
    initialized: DashMap<NonceKey, Arc<OnceCell<()>>>,
}

impl<S: NonceStore> NonceCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            initialized: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn nonce_key(eoa: Address, chain_id: u64) -> NonceKey {
        NonceKey::new(eoa.to_string(), chain_id)
    }

    pub fn is_initialized(&self, key: &NonceKey) -> bool {
        self.initialized
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Seed the counter for `eoa` on `chain` if this coordinator has not yet
    /// and the store holds no counter for it.
    ///
    /// Callers arriving while the seed is in flight wait for it instead of
    /// querying the chain themselves. A failed seed leaves the key
    /// uninitialized so the next caller retries.
    pub async fn ensure_initialized<C: ChainClient>(
        &self,
        eoa: Address,
        chain: &C,
    ) -> Result<NonceKey, NonceManagerError> {
        let key = Self::nonce_key(eoa, chain.chain_id());
        let cell = self.initialized.entry(key.clone()).or_default().clone();

        cell.get_or_try_init(|| async {
            let confirmed = chain.get_transaction_count(eoa, BlockTag::Latest).await?;
            let seed = confirmed as i64 - 1;

            // Another process sharing the store may already be issuing from
            // this counter; its pending nonces sit above the confirmed count.
            if self.store.set_if_absent(&key, seed).await? {
                tracing::debug!(
                    key = %key,
                    confirmed_count = confirmed,
                    seed = seed,
                    "Seeded nonce counter from chain"
                );
            } else {
                tracing::debug!(key = %key, "Adopted existing nonce counter");
            }
            Ok::<(), NonceManagerError>(())
        })
        .await?;

        Ok(key)
    }

    /// Issue the next nonce for an initialized key.
    pub async fn next_nonce(&self, key: &NonceKey) -> Result<u64, NonceManagerError> {
        if !self.is_initialized(key) {
            return Err(NonceManagerError::NotInitialized { key: key.clone() });
        }

        let value = self.store.increment(key, 1).await?;
        u64::try_from(value).map_err(|_| NonceManagerError::NegativeNonce {
            key: key.clone(),
            value,
        })
    }

    pub async fn current_nonce(&self, key: &NonceKey) -> Result<Option<i64>, NonceManagerError> {
        Ok(self.store.get(key).await?)
    }

    /// Step the counter back by one. Only safe when nothing else has been
    /// issued for the key since the nonce being given back.
    pub async fn decrease_nonce(&self, key: &NonceKey) -> Result<i64, NonceManagerError> {
        Ok(self.store.increment(key, -1).await?)
    }

    /// Give `nonce` back if it is still the last one issued for the key.
    ///
    /// The check and the decrement are a single store operation, so a nonce
    /// issued to someone else in between is never handed out twice. Returns
    /// whether the slot was released.
    pub async fn release_nonce(
        &self,
        key: &NonceKey,
        nonce: u64,
    ) -> Result<bool, NonceManagerError> {
        let nonce = nonce as i64;
        let released = self.store.compare_and_set(key, nonce, nonce - 1).await?;

        if released {
            tracing::debug!(key = %key, nonce = nonce, "Released unused nonce");
        }
        Ok(released)
    }

    /// Re-read the chain's pending count, overwrite the counter and issue a
    /// fresh nonce from it.
    pub async fn resync<C: ChainClient>(
        &self,
        key: &NonceKey,
        eoa: Address,
        chain: &C,
    ) -> Result<u64, NonceManagerError> {
        let pending = chain.get_transaction_count(eoa, BlockTag::Pending).await?;
        self.store.set(key, pending as i64 - 1).await?;

        let nonce = self.next_nonce(key).await?;
        tracing::info!(
            key = %key,
            pending_count = pending,
            nonce = nonce,
            "Resynchronized nonce counter with chain"
        );
        Ok(nonce)
    }
}
