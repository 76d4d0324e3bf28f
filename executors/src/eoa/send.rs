use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy::primitives::{Address, B256};
use txretry_core::{
    chain::ChainClient,
    config::{RetryConfig, TxRetryConfig},
    error::EngineError,
    transaction::{TransactionAttempt, TransactionOutcome},
};
use txretry_store::{AnyNonceStore, NonceKey, NonceStore};

use crate::metrics;

use super::{
    backoff::BackoffPolicy,
    error::SendError,
    error_classifier::{ErrorCategory, ErrorClassifier},
    nonce_manager::{NonceCoordinator, NonceManagerError},
};

/// Raise `fee` by `percent`, rounding down.
pub fn bump_priority_fee(fee: u128, percent: u32) -> u128 {
    fee.saturating_mul(100 + percent as u128) / 100
}

/// State carried from one attempt to the next.
struct Attempt {
    tx: TransactionAttempt,
    nonce: u64,
    /// Failed attempts that counted against the budget
    count: u32,
    /// Hash of a broadcast whose receipt is still worth waiting for
    cached_hash: Option<B256>,
    is_filler: bool,
    last_error: Option<String>,
}

impl Attempt {
    fn new(mut tx: TransactionAttempt, nonce: u64) -> Self {
        tx.nonce = Some(nonce);
        Self {
            tx,
            nonce,
            count: 0,
            cached_hash: None,
            is_filler: false,
            last_error: None,
        }
    }

    fn reassign(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.tx.nonce = Some(nonce);
        self.cached_hash = None;
    }

    fn become_filler(&mut self) {
        self.tx = self.tx.filler();
        self.is_filler = true;
        self.cached_hash = None;
    }
}

/// Submits transactions from one account, assigning nonces and recovering
/// from failed attempts until the transaction lands or the retry budget runs
/// out.
///
/// Failures are classified by message:
/// - rate limits wait and retry without using up the budget
/// - likely reverts hand the nonce back when nothing has been issued after
///   it, and otherwise burn the slot with a zero-value filler
/// - nonce conflicts resync the counter from the chain's pending count
/// - inclusion timeouts rebroadcast at the same nonce
/// - anything else retries as is
pub struct RetrySender<S> {
    coordinator: Arc<NonceCoordinator<S>>,
    classifier: ErrorClassifier,
    backoff: BackoffPolicy,
    config: RetryConfig,
}

impl RetrySender<AnyNonceStore> {
    /// Build a sender over the store backend named in the configuration.
    pub async fn from_config(config: &TxRetryConfig) -> Result<Self, EngineError> {
        let store = AnyNonceStore::from_config(&config.store).await?;
        Ok(Self::new(store, config))
    }
}

impl<S: NonceStore> RetrySender<S> {
    pub fn new(store: S, config: &TxRetryConfig) -> Self {
        Self::with_parts(
            Arc::new(NonceCoordinator::new(store)),
            ErrorClassifier::from_config(&config.classifier),
            BackoffPolicy::from_config(&config.retry.backoff),
            config.retry.clone(),
        )
    }

    /// Share a coordinator between senders, e.g. one per chain client.
    pub fn with_parts(
        coordinator: Arc<NonceCoordinator<S>>,
        classifier: ErrorClassifier,
        backoff: BackoffPolicy,
        config: RetryConfig,
    ) -> Self {
        Self {
            coordinator,
            classifier,
            backoff,
            config,
        }
    }

    pub fn coordinator(&self) -> &Arc<NonceCoordinator<S>> {
        &self.coordinator
    }

    /// Send `tx` and wait for its receipt, retrying as needed.
    ///
    /// A nonce is assigned unless the transaction carries one. Resolves only
    /// with a successful receipt of the caller's transaction; every other
    /// end state is a [`SendError`].
    #[tracing::instrument(skip_all, fields(eoa = %tx.from, chain_id = tx.chain_id))]
    pub async fn send_transaction<C: ChainClient>(
        &self,
        tx: TransactionAttempt,
        chain: &C,
    ) -> Result<TransactionOutcome, SendError> {
        let started = Instant::now();
        let mut broadcasts = 0u32;

        let result = self.run(tx, chain, &mut broadcasts).await;

        let chain_id = chain.chain_id();
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        metrics::record_send_outcome(chain_id, outcome, started.elapsed().as_secs_f64());
        metrics::record_send_attempts(chain_id, broadcasts);

        match &result {
            Ok(receipt) => tracing::info!(
                transaction_hash = %receipt.transaction_hash,
                broadcasts = broadcasts,
                "Transaction confirmed"
            ),
            Err(e) if e.is_terminal() => tracing::warn!(
                error = ?e,
                broadcasts = broadcasts,
                "Transaction send ended without success"
            ),
            Err(e) => tracing::error!(error = ?e, "Transaction send aborted"),
        }

        result
    }

    async fn run<C: ChainClient>(
        &self,
        tx: TransactionAttempt,
        chain: &C,
        broadcasts: &mut u32,
    ) -> Result<TransactionOutcome, SendError> {
        let chain_id = chain.chain_id();
        if tx.chain_id != chain_id {
            return Err(SendError::InvalidTransaction {
                message: format!(
                    "transaction targets chain {} but the client serves chain {chain_id}",
                    tx.chain_id
                ),
            });
        }

        let eoa = tx.from;
        let key = self.initialize(eoa, chain).await?;
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => self.coordinator.next_nonce(&key).await?,
        };

        let receipt_timeout = Duration::from_secs(self.config.receipt_timeout_secs);
        let mut attempt = Attempt::new(tx, nonce);

        loop {
            if attempt.count > self.config.max_try {
                return Err(SendError::RetryBudgetExhausted {
                    nonce: attempt.nonce,
                    attempts: attempt.count,
                    last_error: attempt.last_error.take(),
                });
            }

            if attempt.cached_hash.is_none() {
                self.price(&mut attempt, chain).await?;
            }

            let error = match self
                .submit(&mut attempt, chain, receipt_timeout, broadcasts)
                .await
            {
                Ok(outcome) if !outcome.success => {
                    return Err(SendError::Reverted { outcome });
                }
                Ok(outcome) if attempt.is_filler => {
                    return Err(SendError::TransactionDropped {
                        nonce: attempt.nonce,
                        filler_hash: Some(outcome.transaction_hash),
                    });
                }
                Ok(outcome) => return Ok(outcome),
                Err(error) => error.to_string(),
            };

            let category = self.classifier.classify(&error);
            if category.consumes_retry_budget() {
                attempt.count += 1;
            }
            metrics::record_recovery(chain_id, category.as_str());
            self.log_failure(&attempt, category, &error);

            tokio::time::sleep(self.backoff.delay(attempt.count)).await;

            match category {
                ErrorCategory::LikelyReverted => {
                    if self.coordinator.release_nonce(&key, attempt.nonce).await? {
                        return Err(SendError::TransactionFailed {
                            nonce: attempt.nonce,
                            message: error,
                        });
                    }

                    tracing::info!(
                        nonce = attempt.nonce,
                        "Nonce already superseded, sending filler to free the slot"
                    );
                    attempt.become_filler();
                }
                ErrorCategory::NonceConflict => {
                    // A filler only exists to occupy its nonce. If another
                    // transaction already holds that nonce the gap is closed,
                    // and resyncing would spend a fresh nonce on a no-op.
                    if attempt.is_filler {
                        return Err(SendError::TransactionDropped {
                            nonce: attempt.nonce,
                            filler_hash: None,
                        });
                    }

                    let nonce = self.resync(&key, eoa, chain).await?;
                    attempt.reassign(nonce);
                }
                ErrorCategory::InclusionTimeout => {
                    attempt.cached_hash = None;
                }
                ErrorCategory::RateLimited | ErrorCategory::Unclassified => {}
            }

            attempt.last_error = Some(error);
        }
    }

    /// Broadcast unless a previous broadcast is still pending, then wait for
    /// the receipt.
    async fn submit<C: ChainClient>(
        &self,
        attempt: &mut Attempt,
        chain: &C,
        receipt_timeout: Duration,
        broadcasts: &mut u32,
    ) -> Result<TransactionOutcome, EngineError> {
        let transaction_hash = match attempt.cached_hash {
            Some(hash) => hash,
            None => {
                *broadcasts += 1;
                let hash = chain.broadcast(&attempt.tx).await?;
                tracing::debug!(
                    transaction_hash = %hash,
                    nonce = attempt.nonce,
                    is_filler = attempt.is_filler,
                    "Broadcast transaction"
                );
                attempt.cached_hash = Some(hash);
                hash
            }
        };

        chain.await_receipt(transaction_hash, receipt_timeout).await
    }

    /// First attempt takes the network estimate unless a fee was given.
    /// Retries bump the previous fee, never below the current estimate.
    async fn price<C: ChainClient>(
        &self,
        attempt: &mut Attempt,
        chain: &C,
    ) -> Result<(), SendError> {
        let first_attempt = attempt.count == 0;
        if first_attempt && attempt.tx.max_priority_fee_per_gas.is_some() {
            return Ok(());
        }

        let estimate = self.estimate_priority_fee(chain).await?;
        let previous = attempt.tx.max_priority_fee_per_gas;

        let priority_fee = match previous {
            Some(fee) if !first_attempt => {
                bump_priority_fee(fee, self.config.fee_bump_percent).max(estimate)
            }
            _ => estimate,
        };
        attempt.tx.max_priority_fee_per_gas = Some(priority_fee);

        if !first_attempt {
            if let Some(max_fee) = attempt.tx.max_fee_per_gas {
                attempt.tx.max_fee_per_gas =
                    Some(bump_priority_fee(max_fee, self.config.fee_bump_percent).max(priority_fee));
            }
        }

        tracing::debug!(
            previous = ?previous,
            estimate = estimate,
            priority_fee = priority_fee,
            "Priced attempt"
        );
        Ok(())
    }

    fn log_failure(&self, attempt: &Attempt, category: ErrorCategory, error: &str) {
        if self.config.log_errors {
            tracing::warn!(
                nonce = attempt.nonce,
                attempt = attempt.count,
                is_filler = attempt.is_filler,
                category = category.as_str(),
                error = error,
                "Transaction attempt failed"
            );
        } else {
            tracing::debug!(
                nonce = attempt.nonce,
                attempt = attempt.count,
                category = category.as_str(),
                error = error,
                "Transaction attempt failed"
            );
        }
    }

    fn is_rate_limited(&self, error: &EngineError) -> bool {
        self.classifier.classify(&error.to_string()) == ErrorCategory::RateLimited
    }

    async fn pause_for_rate_limit(&self, operation: &str) {
        let delay = self.backoff.delay(0);
        tracing::debug!(
            operation = operation,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, waiting"
        );
        tokio::time::sleep(delay).await;
    }

    // The helpers below retry rate limits only. Any other failure is fatal
    // for the send.

    async fn initialize<C: ChainClient>(
        &self,
        eoa: Address,
        chain: &C,
    ) -> Result<NonceKey, SendError> {
        loop {
            match self.coordinator.ensure_initialized(eoa, chain).await {
                Err(NonceManagerError::Chain(e)) if self.is_rate_limited(&e) => {
                    self.pause_for_rate_limit("initialize_nonce").await
                }
                other => return other.map_err(SendError::from),
            }
        }
    }

    async fn resync<C: ChainClient>(
        &self,
        key: &NonceKey,
        eoa: Address,
        chain: &C,
    ) -> Result<u64, SendError> {
        loop {
            match self.coordinator.resync(key, eoa, chain).await {
                Err(NonceManagerError::Chain(e)) if self.is_rate_limited(&e) => {
                    self.pause_for_rate_limit("resync_nonce").await
                }
                other => return other.map_err(SendError::from),
            }
        }
    }

    async fn estimate_priority_fee<C: ChainClient>(&self, chain: &C) -> Result<u128, SendError> {
        loop {
            match chain.estimate_priority_fee().await {
                Err(e) if self.is_rate_limited(&e) => {
                    self.pause_for_rate_limit("estimate_priority_fee").await
                }
                other => return other.map_err(SendError::from),
            }
        }
    }
}
