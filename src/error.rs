//! Error types and handling for the Surge library

use thiserror::Error;

/// Result type alias for Surge operations
pub type Result<T> = std::result::Result<T, SurgeError>;

/// Main error type for the Surge library
#[derive(Error, Debug)]
pub enum SurgeError {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Invalid argument to a sequencing operation
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message describing the argument issue
        message: String,
    },

    /// The ring buffer cannot satisfy a claim without overwriting
    /// unconsumed events
    #[error("Insufficient capacity to claim sequence range")]
    InsufficientCapacity,

    /// A blocking wait was interrupted by an alert (shutdown signal)
    #[error("Sequence barrier alerted")]
    Alert,

    /// A timeout-variant wait strategy exceeded its deadline
    #[error("Operation timed out")]
    Timeout,
}

impl SurgeError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new argument error
    pub fn argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable.
    ///
    /// Capacity exhaustion and timeouts are transient: the caller can retry
    /// once consumers advance or more events arrive. Alerts and
    /// configuration errors are terminal for the operation that raised them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientCapacity | Self::Timeout)
    }
}
