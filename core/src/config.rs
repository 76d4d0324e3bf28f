use std::{env, path::Path};

use config::{Config, File};
use serde::{Deserialize, Serialize};
use txretry_store::StoreConfig;

use crate::error::EngineError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TxRetryConfig {
    pub retry: RetryConfig,
    pub classifier: ClassifierConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts beyond this count fail the send
    pub max_try: u32,
    pub receipt_timeout_secs: u64,
    /// Priority fee increase applied on every retry
    pub fee_bump_percent: u32,
    /// Log every failed attempt, not only terminal ones
    pub log_errors: bool,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_try: 4,
            receipt_timeout_secs: 120,
            fee_bump_percent: 15,
            log_errors: true,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Flat wait table. `delays_ms[n - 1]` is the wait after the n-th failed
/// attempt; attempts outside the table wait `default_ms`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    pub delays_ms: Vec<u64>,
    pub default_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            delays_ms: vec![10_000; 4],
            default_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub rate_limited: PatternOverrides,
    pub likely_reverted: PatternOverrides,
    pub nonce_conflict: PatternOverrides,
    pub inclusion_timeout: PatternOverrides,
}

/// Per-category pattern customisation. `replace` swaps out the built-in
/// list; `extend` is appended either way.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PatternOverrides {
    pub extend: Vec<String>,
    pub replace: Option<Vec<String>>,
}

impl PatternOverrides {
    pub fn resolve(&self, defaults: &[&str]) -> Vec<String> {
        let base = match &self.replace {
            Some(patterns) => patterns.clone(),
            None => defaults.iter().map(|p| p.to_string()).collect(),
        };
        base.into_iter().chain(self.extend.iter().cloned()).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// EnvFilter directive, takes precedence over RUST_LOG
    pub filter: Option<String>,
    /// Verbose output from this crate family
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Load from `./configuration`, see [`load_config_from`].
pub fn load_config() -> Result<TxRetryConfig, EngineError> {
    let base_path = env::current_dir().map_err(|e| EngineError::ConfigError {
        message: format!("Failed to determine the current directory: {e}"),
    })?;
    load_config_from(&base_path.join("configuration"))
}

/// Layers `tx_retry_base.yaml`, then `tx_retry_{APP_ENVIRONMENT}.yaml`, then
/// `APP__`-prefixed environment variables. Missing files are skipped.
pub fn load_config_from(configuration_directory: &Path) -> Result<TxRetryConfig, EngineError> {
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(|message| EngineError::ConfigError { message })?;

    let environment_filename = format!("tx_retry_{}.yaml", environment.as_str());

    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("tx_retry_base.yaml")).required(false))
        .add_source(
            File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(
            config::Environment::with_prefix("app")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = config.try_deserialize::<TxRetryConfig>()?;
    tracing::debug!(environment = environment.as_str(), "Loaded tx retry configuration");
    Ok(config)
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}
