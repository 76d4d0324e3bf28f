pub mod chain;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod transaction;

pub use txretry_store as store;
