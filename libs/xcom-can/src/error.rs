//! Xcom-CAN Error Types
//!
//! Caller-facing failures are split by kind so that a caller can decide
//! whether to retry, abort or degrade (e.g. fall back from a flash read to a
//! RAM read):
//!
//! - [`XcomError::Transport`] - the bus driver refused the frame
//! - [`XcomError::Timeout`] - nothing answered within the deadline
//! - [`XcomError::Protocol`] - the device answered with an error frame
//!
//! Frames addressed to other participants are dropped silently and never show
//! up here.

use thiserror::Error;

use crate::codec::ServiceKind;
use crate::fault::ProtocolError;
use crate::transport::TransportError;

/// Result type for xcom-can operations
pub type Result<T> = std::result::Result<T, XcomError>;

/// Xcom-CAN errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum XcomError {
    /// Bus driver failure, surfaced as-is and never retried
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No matching response within the caller deadline
    #[error("Timeout: no {kind} response from address {destination} within {timeout_ms}ms")]
    Timeout {
        kind: ServiceKind,
        destination: u16,
        timeout_ms: u64,
    },

    /// Error frame reported by the far end
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Address outside the 10-bit range
    #[error("Invalid address: {0} (must be 0..=1023)")]
    InvalidAddress(u16),

    /// Identifier field outside its bit range
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Response variant does not belong to the request
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Node receive loop is not running
    #[error("Node not started")]
    NotStarted,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

// Helper methods for creating errors
impl XcomError {
    pub fn codec(msg: impl Into<String>) -> Self {
        XcomError::Codec(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        XcomError::Config(msg.into())
    }

    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        XcomError::InvalidIdentifier(msg.into())
    }

    /// Check if this error is a local timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, XcomError::Timeout { .. })
    }

    /// Check if this error was reported by the far end
    pub fn is_protocol(&self) -> bool {
        matches!(self, XcomError::Protocol(_))
    }

    /// The protocol error carried by this error, if any
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            XcomError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Check if repeating the same request may succeed
    ///
    /// Timeouts, busy gateways and transient driver failures are worth a retry;
    /// a device that rejected the request will reject it again.
    pub fn is_retryable(&self) -> bool {
        match self {
            XcomError::Timeout { .. } => true,
            XcomError::Protocol(e) => e.category.is_transient(),
            XcomError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::fault::ErrorCategory;

    #[test]
    fn test_timeout_display() {
        let err = XcomError::Timeout {
            kind: ServiceKind::ParameterRead,
            destination: 101,
            timeout_ms: 1000,
        };
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Timeout: no ParameterRead response from address 101 within 1000ms"
        );
    }

    #[test]
    fn test_protocol_error_classification() {
        let err = XcomError::from(ProtocolError::new(1, 0x02));
        assert!(err.is_protocol());
        assert!(!err.is_timeout());
        assert!(!err.is_retryable());
        assert_eq!(
            err.protocol_error().map(|e| e.category),
            Some(ErrorCategory::DeviceNotFound)
        );

        let busy = XcomError::from(ProtocolError::new(1, 0x13));
        assert!(busy.is_retryable());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: XcomError = TransportError::SendFailed("bus off".to_string()).into();
        assert!(matches!(err, XcomError::Transport(_)));
        assert_eq!(err.to_string(), "Transport error: Send failed: bus off");
    }
}
