use std::fmt;

/// Identifies one nonce counter: an account on a chain.
///
/// The account address is lowercased so checksummed and plain spellings of
/// the same address share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceKey(String);

impl NonceKey {
    pub fn new(address: impl AsRef<str>, chain_id: u64) -> Self {
        Self(format!(
            "nonce:{}:{}",
            address.as_ref().to_lowercase(),
            chain_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
