use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::{LogFormat, LoggingConfig},
    error::EngineError,
};

const DEFAULT_FILTER: &str = "txretry_executors=info,txretry_core=info,txretry_store=info";
const DEBUG_FILTER: &str = "txretry_executors=debug,txretry_core=debug,txretry_store=debug";

/// Install the global tracing subscriber.
///
/// Filter precedence: `logging.filter`, then `RUST_LOG`, then the crate
/// defaults (debug level when `logging.debug` is set).
pub fn init_tracing(config: &LoggingConfig) -> Result<(), EngineError> {
    let filter = match &config.filter {
        Some(directive) => EnvFilter::try_new(directive).map_err(|e| EngineError::ConfigError {
            message: format!("Invalid log filter `{directive}`: {e}"),
        })?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if config.debug {
                DEBUG_FILTER.into()
            } else {
                DEFAULT_FILTER.into()
            }
        }),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| EngineError::InternalError {
        message: format!("Failed to install tracing subscriber: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_a_config_error() {
        let config = LoggingConfig {
            filter: Some("txretry_core=loud".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            init_tracing(&config),
            Err(EngineError::ConfigError { .. })
        ));
    }
}
