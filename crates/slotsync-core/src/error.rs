//! Error types for the availability engine
//!
//! The variants follow the engine's error taxonomy:
//!
//! - **Connection** / **Subscription**: transient, retried internally with backoff
//! - **Data**: malformed documents from the store, never retried
//! - **Validation**: rejected at write time, never enters a cache
//!
//! Booking conflicts are not errors. They travel as [`crate::conflict::ConflictRecord`]
//! values through the conflict channel.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Probe or live-query transport failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Live-query subscription could not be established
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The store delivered a document that does not decode
    #[error("Data error: {0}")]
    Data(String),

    /// A write was rejected before reaching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed `HH:MM` time string
    #[error("Invalid time '{0}': expected HH:MM")]
    TimeParse(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Appointment status change that the lifecycle does not allow
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Invalid engine configuration
    #[error("Config error: {0}")]
    Config(String),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted after `shutdown()`
    #[error("Engine has been shut down")]
    ShutDown,
}

impl EngineError {
    /// Whether the failure is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection(_) | EngineError::Subscription(_)
        )
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
