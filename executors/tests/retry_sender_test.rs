use fixtures::*;

use std::collections::HashSet;

use alloy::primitives::{B256, U256};
use txretry_core::config::TxRetryConfig;
use txretry_core::error::EngineError;
use txretry_executors::{RetrySender, SendError};
use txretry_store::{AnyNonceStore, MemoryNonceStore, NonceKey, NonceStore};

fn sender() -> RetrySender<MemoryNonceStore> {
    RetrySender::new(MemoryNonceStore::new(), &TxRetryConfig::default())
}

fn key() -> NonceKey {
    NonceKey::new(EOA.to_string(), CHAIN_ID)
}

fn receipt_timeout() -> EngineError {
    EngineError::ReceiptTimeout {
        chain_id: CHAIN_ID,
        transaction_hash: Default::default(),
        timeout_secs: 120,
    }
}

#[tokio::test(start_paused = true)]
async fn first_attempt_uses_next_nonce_and_network_fee() {
    setup_tracing();
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(3)
        .with_priority_fee(2_000_000_000);

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.broadcast_nonces(), vec![Some(3)]);
    assert_eq!(chain.broadcast_priority_fees(), vec![Some(2_000_000_000)]);
    assert_eq!(chain.latest_queries(), 1);
    assert_eq!(sender.coordinator().store().get(&key()).await.unwrap(), Some(3));
}

#[tokio::test(start_paused = true)]
async fn unclassified_failures_exhaust_budget_after_five_broadcasts() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(3);
    chain.fail_all_broadcasts(rpc_error("connection reset by peer"));

    let err = sender
        .send_transaction(transfer(), &chain)
        .await
        .unwrap_err();

    match &err {
        SendError::RetryBudgetExhausted {
            nonce,
            attempts,
            last_error,
        } => {
            assert_eq!(*nonce, 3);
            assert_eq!(*attempts, 5);
            assert!(
                last_error
                    .as_deref()
                    .unwrap()
                    .contains("connection reset by peer")
            );
        }
        other => panic!("expected RetryBudgetExhausted, got {other:?}"),
    }
    assert_eq!(err.to_string(), "Transaction Failed More than Max Try");
    assert_eq!(chain.broadcasts().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn superseded_nonce_is_burned_with_filler() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(7);

    // Another send already took nonce 8
    let coordinator = sender.coordinator();
    let key = coordinator.ensure_initialized(EOA, &chain).await.unwrap();
    assert_eq!(coordinator.next_nonce(&key).await.unwrap(), 7);
    assert_eq!(coordinator.next_nonce(&key).await.unwrap(), 8);

    chain.push_broadcast_error(rpc_error("Execution reverted for an unknown reason"));
    let tx = transfer()
        .with_nonce(7)
        .with_value(U256::from(1_000))
        .with_input(vec![0xde, 0xad]);

    let err = sender.send_transaction(tx, &chain).await.unwrap_err();

    assert_eq!(err.to_string(), "Transaction dropped");
    assert!(matches!(
        err,
        SendError::TransactionDropped {
            nonce: 7,
            filler_hash: Some(_)
        }
    ));

    let broadcasts = chain.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    let filler = &broadcasts[1];
    assert_eq!(filler.nonce, Some(7));
    assert_eq!(filler.to, EOA);
    assert_eq!(filler.value, U256::ZERO);
    assert!(filler.input.is_empty());
    assert_eq!(filler.gas_limit, Some(21_000));

    // The counter is untouched
    assert_eq!(coordinator.current_nonce(&key).await.unwrap(), Some(8));
}

#[tokio::test(start_paused = true)]
async fn unused_nonce_is_rolled_back_on_likely_revert() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(7);
    chain.push_broadcast_error(rpc_error(
        "missing revert data (action=\"estimateGas\", data=null)",
    ));

    let err = sender
        .send_transaction(transfer(), &chain)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Transaction Failed");
    assert!(matches!(err, SendError::TransactionFailed { nonce: 7, .. }));
    assert!(err.is_terminal());
    assert_eq!(chain.broadcasts().len(), 1);
    assert_eq!(sender.coordinator().store().get(&key()).await.unwrap(), Some(6));
}

#[tokio::test(start_paused = true)]
async fn nonce_conflict_resyncs_from_pending_count() {
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(3)
        .with_pending_count(5);
    chain.push_broadcast_error(rpc_error("nonce has already been used"));

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.broadcast_nonces(), vec![Some(3), Some(5)]);
    assert_eq!(chain.pending_queries(), 1);
    assert_eq!(sender.coordinator().store().get(&key()).await.unwrap(), Some(5));
}

#[tokio::test(start_paused = true)]
async fn filler_hitting_nonce_conflict_reports_drop() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(7);
    let coordinator = sender.coordinator();
    let key = coordinator.ensure_initialized(EOA, &chain).await.unwrap();
    coordinator.next_nonce(&key).await.unwrap();
    coordinator.next_nonce(&key).await.unwrap();

    chain.push_broadcast_error(rpc_error("EstimateGasExecutionError: execution reverted"));
    chain.push_broadcast_error(rpc_error("nonce too low. Try increasing the nonce."));

    let err = sender
        .send_transaction(transfer().with_nonce(7), &chain)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::TransactionDropped {
            nonce: 7,
            filler_hash: None
        }
    ));
    assert_eq!(chain.broadcasts().len(), 2);
    assert_eq!(chain.pending_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn inclusion_timeout_rebroadcasts_same_nonce() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(4);
    chain.push_receipt(ReceiptScript::Fail(receipt_timeout()));

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.broadcast_nonces(), vec![Some(4), Some(4)]);
    assert_eq!(chain.receipt_waits(), 2);
}

#[tokio::test(start_paused = true)]
async fn unclassified_receipt_failure_keeps_waiting_on_same_broadcast() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(4);
    chain.push_receipt(ReceiptScript::Fail(rpc_error("upstream connection closed")));

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.broadcasts().len(), 1);
    assert_eq!(chain.receipt_waits(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limits_do_not_consume_retry_budget() {
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(1)
        .with_priority_fee(100);
    for _ in 0..8 {
        chain.push_broadcast_error(rpc_error("HTTP error 429: Too Many Requests"));
    }

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.broadcasts().len(), 9);
    // Still the first attempt as far as pricing goes
    assert!(
        chain
            .broadcast_priority_fees()
            .iter()
            .all(|fee| *fee == Some(100))
    );
}

#[tokio::test(start_paused = true)]
async fn retries_bump_priority_fee() {
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(1)
        .with_priority_fee(100);
    chain.push_broadcast_error(rpc_error("replacement transaction underpriced"));
    chain.push_broadcast_error(rpc_error("replacement transaction underpriced"));

    sender.send_transaction(transfer(), &chain).await.unwrap();

    assert_eq!(
        chain.broadcast_priority_fees(),
        vec![Some(100), Some(115), Some(132)]
    );
}

#[tokio::test(start_paused = true)]
async fn bumped_fee_never_falls_below_network_estimate() {
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(1)
        .with_priority_fee(100);
    chain.push_priority_fee(100);
    chain.push_priority_fee(300);
    chain.push_broadcast_error(rpc_error("replacement transaction underpriced"));
    chain.push_broadcast_error(rpc_error("replacement transaction underpriced"));

    sender.send_transaction(transfer(), &chain).await.unwrap();

    assert_eq!(
        chain.broadcast_priority_fees(),
        vec![Some(100), Some(300), Some(345)]
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_priority_fee_is_kept_on_first_attempt() {
    let sender = sender();
    let chain = MockChainClient::new()
        .with_latest_count(1)
        .with_priority_fee(100);

    sender
        .send_transaction(transfer().with_max_priority_fee_per_gas(500), &chain)
        .await
        .unwrap();

    assert_eq!(chain.broadcast_priority_fees(), vec![Some(500)]);
}

#[tokio::test(start_paused = true)]
async fn reverted_receipt_is_terminal() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(2);
    chain.push_receipt(ReceiptScript::Reverted);

    let err = sender
        .send_transaction(transfer(), &chain)
        .await
        .unwrap_err();

    match err {
        SendError::Reverted { outcome } => assert!(!outcome.success),
        other => panic!("expected Reverted, got {other:?}"),
    }
    assert_eq!(chain.broadcasts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reverted_filler_receipt_is_reported_as_revert() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(7);
    let coordinator = sender.coordinator();
    let key = coordinator.ensure_initialized(EOA, &chain).await.unwrap();
    coordinator.next_nonce(&key).await.unwrap();
    coordinator.next_nonce(&key).await.unwrap();

    chain.push_broadcast_error(rpc_error("Execution reverted for an unknown reason"));
    chain.push_receipt(ReceiptScript::Reverted);

    let err = sender
        .send_transaction(transfer().with_nonce(7), &chain)
        .await
        .unwrap_err();

    match err {
        SendError::Reverted { outcome } => {
            assert!(!outcome.success);
            assert_eq!(outcome.transaction_hash, B256::with_last_byte(2));
        }
        other => panic!("expected Reverted, got {other:?}"),
    }
    assert_eq!(chain.broadcasts()[1].to, EOA);
}

#[tokio::test(start_paused = true)]
async fn unexpected_fee_estimation_error_is_fatal() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(2);
    chain.push_fee_error(rpc_error("invalid api key"));

    let err = sender
        .send_transaction(transfer(), &chain)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SendError::ChainError { .. }));
    assert!(chain.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_chain_reads_are_retried() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(2);
    chain.push_count_error(rpc_error("Too Many Requests"));
    chain.push_fee_error(rpc_error("Too Many Requests"));

    let outcome = sender.send_transaction(transfer(), &chain).await.unwrap();

    assert!(outcome.success);
    assert_eq!(chain.latest_queries(), 2);
    assert_eq!(chain.broadcast_nonces(), vec![Some(2)]);
}

#[tokio::test(start_paused = true)]
async fn chain_mismatch_is_rejected_before_any_call() {
    let sender = sender();
    let chain = MockChainClient::new();
    let tx = txretry_core::transaction::TransactionAttempt::new(1, EOA, RECIPIENT);

    let err = sender.send_transaction(tx, &chain).await.unwrap_err();

    assert!(matches!(err, SendError::InvalidTransaction { .. }));
    assert_eq!(chain.latest_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_get_distinct_nonces() {
    let sender = sender();
    let chain = MockChainClient::new().with_latest_count(3);

    let sends = (0..10).map(|_| sender.send_transaction(transfer(), &chain));
    let outcomes = futures::future::join_all(sends).await;

    assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
    assert_eq!(chain.latest_queries(), 1);

    let nonces: HashSet<Option<u64>> = chain.broadcast_nonces().into_iter().collect();
    assert_eq!(nonces, (3..13).map(Some).collect::<HashSet<_>>());
}

#[tokio::test]
async fn sender_builds_from_default_config() {
    let sender = RetrySender::from_config(&TxRetryConfig::default())
        .await
        .unwrap();

    assert!(matches!(
        sender.coordinator().store(),
        AnyNonceStore::Memory(_)
    ));
}
