pub mod eoa;
pub mod metrics;

pub use eoa::{RetrySender, SendError};
