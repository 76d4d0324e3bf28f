use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{NonceKey, NonceStore, StoreError};

/// In-process counters. Clones share the same map.
///
/// Each increment holds the key's shard lock for the read-modify-write, so
/// issuance stays race-free on a multi-threaded runtime too.
#[derive(Debug, Clone, Default)]
pub struct MemoryNonceStore {
    counters: Arc<DashMap<NonceKey, i64>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for MemoryNonceStore {
    async fn get(&self, key: &NonceKey) -> Result<Option<i64>, StoreError> {
        Ok(self.counters.get(key).map(|value| *value))
    }

    async fn set(&self, key: &NonceKey, value: i64) -> Result<(), StoreError> {
        self.counters.insert(key.clone(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &NonceKey, value: i64) -> Result<bool, StoreError> {
        match self.counters.entry(key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &NonceKey, delta: i64) -> Result<i64, StoreError> {
        let mut entry = self.counters.entry(key.clone()).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn compare_and_set(
        &self,
        key: &NonceKey,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        match self.counters.get_mut(key) {
            Some(mut value) if *value == expected => {
                *value = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
