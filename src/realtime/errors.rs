//! # Real-Time Errors
//!
//! Error types for the real-time module.
//!
//! These errors only surface at construction time (invalid descriptors,
//! malformed wire frames, transport setup). A running activation absorbs
//! every failure into its connection status instead of returning it.

use thiserror::Error;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Connection Errors
    // ==================
    /// Channel closed by the server or the transport
    #[error("Channel closed")]
    ChannelClosed,

    /// Join was not acknowledged in time
    #[error("Channel join timed out")]
    JoinTimeout,

    /// Connection could not be established
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Invalid frame received from the server
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    // ==================
    // Subscription Errors
    // ==================
    /// Row filter could not be parsed
    #[error("Invalid filter '{0}': {1}")]
    InvalidFilter(String, String),

    /// Two descriptors share one key
    #[error("Duplicate subscription key: {0}")]
    DuplicateKey(String),

    /// Descriptor without a table name
    #[error("Subscription '{0}' has no table")]
    MissingTable(String),

    // ==================
    // Internal Errors
    // ==================
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Whether the failure counts against the circuit breaker
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RealtimeError::ChannelClosed
                | RealtimeError::JoinTimeout
                | RealtimeError::ConnectionError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures() {
        assert!(RealtimeError::JoinTimeout.is_transport_failure());
        assert!(RealtimeError::ConnectionError("refused".into()).is_transport_failure());
        assert!(!RealtimeError::DuplicateKey("a".into()).is_transport_failure());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::InvalidFilter("user_id".into(), "missing '='".into());
        assert_eq!(err.to_string(), "Invalid filter 'user_id': missing '='");
    }
}
