pub mod backoff;
pub mod error;
pub mod error_classifier;
pub mod nonce_manager;
pub mod send;

pub use backoff::BackoffPolicy;
pub use error::SendError;
pub use error_classifier::{ErrorCategory, ErrorClassifier};
pub use nonce_manager::{NonceCoordinator, NonceManagerError};
pub use send::{RetrySender, bump_priority_fee};
