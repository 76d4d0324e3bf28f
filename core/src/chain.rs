use std::time::Duration;

use alloy::{
    network::ReceiptResponse,
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder},
    rpc::types::BlockId,
    transports::http::reqwest::Url,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AlloyRpcErrorToEngineError, EngineError},
    transaction::{TransactionAttempt, TransactionOutcome},
};

const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Which view of the account's transaction count to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    /// Confirmed transactions only
    Latest,
    /// Including transactions still in the mempool
    Pending,
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::latest(),
            BlockTag::Pending => BlockId::pending(),
        }
    }
}

/// Fee cap for a pinned priority fee: the base fee share of an EIP-1559
/// estimate plus `priority`.
fn fee_cap(estimated_max_fee: u128, estimated_priority_fee: u128, priority: u128) -> u128 {
    estimated_max_fee
        .saturating_sub(estimated_priority_fee)
        .saturating_add(priority)
}

/// What the retry loop needs from a chain. Signing and broadcast mechanics
/// live behind `broadcast`.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Submit the transaction and return its hash
    fn broadcast(
        &self,
        tx: &TransactionAttempt,
    ) -> impl Future<Output = Result<B256, EngineError>> + Send;

    /// Wait for the receipt of a broadcast transaction, failing after `timeout`
    fn await_receipt(
        &self,
        transaction_hash: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<TransactionOutcome, EngineError>> + Send;

    fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Current network estimate for the priority fee, in wei
    fn estimate_priority_fee(&self) -> impl Future<Output = Result<u128, EngineError>> + Send;
}

/// [`ChainClient`] over an alloy provider. Signing is left to the provider:
/// use one built with a wallet filler, or a node that holds the key.
#[derive(Clone)]
pub struct AlloyChainClient<P> {
    provider: P,
    chain_id: u64,
    receipt_poll_interval: Duration,
}

impl<P: Provider> AlloyChainClient<P> {
    pub fn new(provider: P, chain_id: u64) -> Self {
        Self {
            provider,
            chain_id,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }
}

impl AlloyChainClient<alloy::providers::RootProvider> {
    /// Read-and-broadcast client over HTTP, for nodes that sign on their side
    pub async fn connect_http(rpc_url: &str) -> Result<Self, EngineError> {
        let url: Url = rpc_url.parse().map_err(|e| EngineError::ConfigError {
            message: format!("Invalid RPC url {rpc_url}: {e}"),
        })?;
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_http(url);
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| e.to_engine_error(0))?;

        Ok(Self::new(provider, chain_id))
    }
}

impl<P: Provider> ChainClient for AlloyChainClient<P> {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn broadcast(&self, tx: &TransactionAttempt) -> Result<B256, EngineError> {
        let mut request = tx.to_request();

        // A priority fee without a max fee would let fillers re-estimate both.
        // Keep the priority fee and derive the cap from the current base fee.
        if let (Some(priority), None) = (tx.max_priority_fee_per_gas, tx.max_fee_per_gas) {
            let estimate = self
                .provider
                .estimate_eip1559_fees()
                .await
                .map_err(|e| e.to_engine_error(self.chain_id))?;
            request.max_fee_per_gas = Some(fee_cap(
                estimate.max_fee_per_gas,
                estimate.max_priority_fee_per_gas,
                priority,
            ));
        }

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| e.to_engine_error(self.chain_id))?;

        Ok(*pending.tx_hash())
    }

    async fn await_receipt(
        &self,
        transaction_hash: B256,
        timeout: Duration,
    ) -> Result<TransactionOutcome, EngineError> {
        let poll = async {
            loop {
                let receipt = self
                    .provider
                    .get_transaction_receipt(transaction_hash)
                    .await
                    .map_err(|e| e.to_engine_error(self.chain_id))?;

                if let Some(receipt) = receipt {
                    return Ok(TransactionOutcome {
                        transaction_hash,
                        success: receipt.status(),
                        block_number: receipt.block_number(),
                        gas_used: Some(receipt.gas_used()),
                    });
                }

                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| EngineError::ReceiptTimeout {
                chain_id: self.chain_id,
                transaction_hash,
                timeout_secs: timeout.as_secs(),
            })?
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, EngineError> {
        self.provider
            .get_transaction_count(address)
            .block_id(tag.into())
            .await
            .map_err(|e| e.to_engine_error(self.chain_id))
    }

    async fn estimate_priority_fee(&self) -> Result<u128, EngineError> {
        self.provider
            .estimate_eip1559_fees()
            .await
            .map(|fees| fees.max_priority_fee_per_gas)
            .map_err(|e| e.to_engine_error(self.chain_id))
    }
}
