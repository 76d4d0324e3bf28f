#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Stored nonce for {key} is not an integer: {value}")]
    CorruptValue { key: String, value: String },
}
