use alloy::{
    network::TransactionBuilder,
    primitives::{Address, B256, Bytes, U256},
    rpc::types::TransactionRequest,
};
use serde::{Deserialize, Serialize};

/// Gas limit of a plain value transfer, enough for a filler.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// One transaction as it moves through the retry loop.
///
/// `nonce` and `max_priority_fee_per_gas` are filled in (and bumped) by the
/// sender when the caller leaves them unset.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttempt {
    pub chain_id: u64,

    /// Sending account, the account whose nonce is consumed
    pub from: Address,

    pub to: Address,

    #[serde(default)]
    pub input: Bytes,

    #[serde(default)]
    pub value: U256,

    #[serde(default)]
    pub nonce: Option<u64>,

    /// If not provided, the chain client estimates it
    #[serde(default)]
    pub gas_limit: Option<u64>,

    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,

    #[serde(default)]
    pub max_priority_fee_per_gas: Option<u128>,
}

impl TransactionAttempt {
    pub fn new(chain_id: u64, from: Address, to: Address) -> Self {
        Self {
            chain_id,
            from,
            to,
            input: Bytes::new(),
            value: U256::ZERO,
            nonce: None,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_max_priority_fee_per_gas(mut self, fee: u128) -> Self {
        self.max_priority_fee_per_gas = Some(fee);
        self
    }

    /// Zero-value self transfer at the same nonce. Consumes a stuck nonce slot
    /// without executing anything.
    pub fn filler(&self) -> Self {
        Self {
            chain_id: self.chain_id,
            from: self.from,
            to: self.from,
            input: Bytes::new(),
            value: U256::ZERO,
            nonce: self.nonce,
            gas_limit: Some(TRANSFER_GAS_LIMIT),
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }

    pub fn to_request(&self) -> TransactionRequest {
        let mut request = TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.input.clone())
            .with_chain_id(self.chain_id);

        if let Some(nonce) = self.nonce {
            request = request.with_nonce(nonce);
        }
        if let Some(gas_limit) = self.gas_limit {
            request = request.with_gas_limit(gas_limit);
        }
        if let Some(max_fee) = self.max_fee_per_gas {
            request = request.with_max_fee_per_gas(max_fee);
        }
        if let Some(max_priority) = self.max_priority_fee_per_gas {
            request = request.with_max_priority_fee_per_gas(max_priority);
        }
        request
    }
}

/// Confirmed outcome of a broadcast transaction.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub transaction_hash: B256,
    /// `false` when the transaction was mined but reverted
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}
