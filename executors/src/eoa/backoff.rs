use std::time::Duration;

use txretry_core::config::BackoffConfig;

/// Flat wait between attempts.
///
/// Confirmation time dominates retry latency, so the table stays flat
/// instead of growing exponentially.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
    default_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(delays: Vec<Duration>, default_delay: Duration) -> Self {
        Self {
            delays,
            default_delay,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config
                .delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            Duration::from_millis(config.default_ms),
        )
    }

    /// Wait before the next attempt, given the attempt count after the
    /// failure. Counts start at 1 in the table; anything else falls back.
    pub fn delay(&self, attempt_count: u32) -> Duration {
        attempt_count
            .checked_sub(1)
            .and_then(|index| self.delays.get(index as usize))
            .copied()
            .unwrap_or(self.default_delay)
    }
}
