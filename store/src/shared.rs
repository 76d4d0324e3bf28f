use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{NonceKey, NonceStore, StoreError};

/// Counters kept in redis so several processes can issue nonces for the
/// same account. `INCRBY` provides the atomic increment.
#[derive(Clone)]
pub struct RedisNonceStore {
    redis: ConnectionManager,
    namespace: Option<String>,
}

impl RedisNonceStore {
    pub fn new(redis: ConnectionManager, namespace: Option<String>) -> Self {
        Self { redis, namespace }
    }

    pub async fn connect(url: &str, namespace: Option<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let redis = client.get_connection_manager().await?;
        Ok(Self::new(redis, namespace))
    }

    pub fn redis_key(&self, key: &NonceKey) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }
}

impl NonceStore for RedisNonceStore {
    async fn get(&self, key: &NonceKey) -> Result<Option<i64>, StoreError> {
        let mut conn = self.redis.clone();
        let redis_key = self.redis_key(key);

        let raw: Option<String> = conn.get(&redis_key).await?;

        raw.map(|value| {
            value
                .parse::<i64>()
                .map_err(|_| StoreError::CorruptValue {
                    key: redis_key.clone(),
                    value,
                })
        })
        .transpose()
    }

    async fn set(&self, key: &NonceKey, value: i64) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(self.redis_key(key), value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &NonceKey, value: i64) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let written: bool = conn.set_nx(self.redis_key(key), value).await?;
        Ok(written)
    }

    async fn increment(&self, key: &NonceKey, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: i64 = conn.incr(self.redis_key(key), delta).await?;
        Ok(value)
    }

    async fn compare_and_set(
        &self,
        key: &NonceKey,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        let script = redis::Script::new(
            r#"
            local current = redis.call('GET', KEYS[1])
            if current and tonumber(current) == tonumber(ARGV[1]) then
                redis.call('SET', KEYS[1], ARGV[2])
                return 1
            end
            return 0
            "#,
        );

        let written: i32 = script
            .key(self.redis_key(key))
            .arg(expected)
            .arg(new)
            .invoke_async(&mut self.redis.clone())
            .await?;

        Ok(written == 1)
    }
}
