//! Piast core library
//!
//! Domain models, the OCR status state machine, the error taxonomy, the
//! retry/backoff policy, and configuration shared across all Piast components.

pub mod capacity;
pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod validation;

// Re-export commonly used types
pub use capacity::CapacityGate;
pub use config::Config;
pub use error::{ErrorClass, ProcessError};
pub use retry::{next_retry_delay, RetryPolicy};
