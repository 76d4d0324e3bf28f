use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use txretry_core::{error::EngineError, transaction::TransactionOutcome};

use super::nonce_manager::NonceManagerError;

/// Why a send did not produce a successful receipt for the caller's
/// transaction.
#[derive(Serialize, Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum SendError {
    #[error("Transaction Failed More than Max Try")]
    #[serde(rename_all = "camelCase")]
    RetryBudgetExhausted {
        nonce: u64,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("Transaction reverted on-chain: {}", .outcome.transaction_hash)]
    Reverted { outcome: TransactionOutcome },

    /// A filler consumed the nonce; the caller's transaction never executed.
    #[error("Transaction dropped")]
    #[serde(rename_all = "camelCase")]
    TransactionDropped {
        nonce: u64,
        filler_hash: Option<B256>,
    },

    /// The transaction was abandoned and its nonce handed back.
    #[error("Transaction Failed")]
    TransactionFailed { nonce: u64, message: String },

    #[error("Chain error: {inner_error}")]
    #[serde(rename_all = "camelCase")]
    ChainError { inner_error: EngineError },

    #[error("Nonce error: {message}")]
    NonceError { message: String },

    #[error("Invalid transaction: {message}")]
    InvalidTransaction { message: String },
}

impl SendError {
    /// Outcomes of the retry protocol itself, as opposed to fatal errors
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendError::RetryBudgetExhausted { .. }
                | SendError::Reverted { .. }
                | SendError::TransactionDropped { .. }
                | SendError::TransactionFailed { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_terminal()
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            SendError::RetryBudgetExhausted { .. } => "budget_exhausted",
            SendError::Reverted { .. } => "reverted",
            SendError::TransactionDropped { .. } => "dropped",
            SendError::TransactionFailed { .. } => "failed",
            SendError::ChainError { .. } => "chain_error",
            SendError::NonceError { .. } => "nonce_error",
            SendError::InvalidTransaction { .. } => "invalid",
        }
    }
}

impl From<EngineError> for SendError {
    fn from(inner_error: EngineError) -> Self {
        SendError::ChainError { inner_error }
    }
}

impl From<NonceManagerError> for SendError {
    fn from(err: NonceManagerError) -> Self {
        match err {
            NonceManagerError::Chain(inner_error) => SendError::ChainError { inner_error },
            other => SendError::NonceError {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_messages_match_caller_contract() {
        let dropped = SendError::TransactionDropped {
            nonce: 7,
            filler_hash: None,
        };
        assert_eq!(dropped.to_string(), "Transaction dropped");
        assert!(dropped.is_terminal());

        let failed = SendError::TransactionFailed {
            nonce: 7,
            message: "execution reverted".to_string(),
        };
        assert_eq!(failed.to_string(), "Transaction Failed");

        let exhausted = SendError::RetryBudgetExhausted {
            nonce: 3,
            attempts: 5,
            last_error: None,
        };
        assert_eq!(exhausted.to_string(), "Transaction Failed More than Max Try");
    }

    #[test]
    fn chain_errors_are_fatal() {
        let err: SendError = EngineError::InternalError {
            message: "boom".to_string(),
        }
        .into();
        assert!(err.is_fatal());
        assert_eq!(err.outcome_label(), "chain_error");
    }

    #[test]
    fn serializes_with_error_code_tag() {
        let err = SendError::TransactionDropped {
            nonce: 7,
            filler_hash: Some(B256::ZERO),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["errorCode"], "TRANSACTION_DROPPED");
        assert_eq!(json["nonce"], 7);
        assert!(json["fillerHash"].is_string());
    }
}
