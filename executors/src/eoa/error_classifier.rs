use serde::{Deserialize, Serialize};
use txretry_core::config::ClassifierConfig;

pub const DEFAULT_RATE_LIMITED_PATTERNS: &[&str] = &["Too Many Requests"];

pub const DEFAULT_LIKELY_REVERTED_PATTERNS: &[&str] = &[
    "action=\"estimateGas\"",
    "Execution reverted for an unknown reason",
    "EstimateGasExecutionError",
];

pub const DEFAULT_NONCE_CONFLICT_PATTERNS: &[&str] =
    &["Try increasing the nonce", "nonce has already been used"];

pub const DEFAULT_INCLUSION_TIMEOUT_PATTERNS: &[&str] = &["Timed out while waiting for transaction"];

/// What a failed submission most likely means for the nonce it used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Provider pushback, says nothing about the transaction
    RateLimited,
    /// The transaction would revert or failed gas estimation
    LikelyReverted,
    /// Local nonce disagrees with the chain
    NonceConflict,
    /// Broadcast state unknown, receipt never arrived
    InclusionTimeout,
    Unclassified,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::LikelyReverted => "likely_reverted",
            ErrorCategory::NonceConflict => "nonce_conflict",
            ErrorCategory::InclusionTimeout => "inclusion_timeout",
            ErrorCategory::Unclassified => "unclassified",
        }
    }

    pub fn consumes_retry_budget(&self) -> bool {
        !matches!(self, ErrorCategory::RateLimited)
    }
}

/// Maps raw failure messages to an [`ErrorCategory`] by substring.
///
/// Categories are checked in a fixed order (rate limited, reverted, nonce
/// conflict, inclusion timeout) and the first hit wins. Matching ignores
/// case; providers are not consistent about it.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<(ErrorCategory, Vec<String>)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

impl ErrorClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let rules = vec![
            (
                ErrorCategory::RateLimited,
                config.rate_limited.resolve(DEFAULT_RATE_LIMITED_PATTERNS),
            ),
            (
                ErrorCategory::LikelyReverted,
                config.likely_reverted.resolve(DEFAULT_LIKELY_REVERTED_PATTERNS),
            ),
            (
                ErrorCategory::NonceConflict,
                config.nonce_conflict.resolve(DEFAULT_NONCE_CONFLICT_PATTERNS),
            ),
            (
                ErrorCategory::InclusionTimeout,
                config
                    .inclusion_timeout
                    .resolve(DEFAULT_INCLUSION_TIMEOUT_PATTERNS),
            ),
        ];

        Self {
            rules: rules
                .into_iter()
                .map(|(category, patterns)| {
                    let patterns = patterns
                        .into_iter()
                        .filter(|p| !p.is_empty())
                        .map(|p| p.to_lowercase())
                        .collect();
                    (category, patterns)
                })
                .collect(),
        }
    }

    pub fn classify(&self, message: &str) -> ErrorCategory {
        let msg_lower = message.to_lowercase();

        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| msg_lower.contains(p.as_str())))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unclassified)
    }
}
