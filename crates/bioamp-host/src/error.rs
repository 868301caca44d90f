//! Error types for acquisition sessions
//!
//! Session errors follow the failure taxonomy of the board protocol:
//! bad arguments are [`SessionError::Validation`], operations that make no
//! sense in the current session state are [`SessionError::State`], waits
//! that expire are [`SessionError::Timeout`] and transport failures pass
//! through unchanged as [`SessionError::Transport`].

use bioamp_core::ValidationError;
use thiserror::Error;

// ============================================================================
// Session Errors
// ============================================================================

/// Errors reported by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An argument had the wrong shape or range
    #[error("Invalid argument: {0}")]
    Validation(#[from] ValidationError),

    /// The operation is not valid in the current session state
    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    /// The board did not answer in time
    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout {
        /// Operation that was waiting
        operation: &'static str,
        /// How long it waited
        waited_ms: u64,
    },

    /// The transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The operation was cancelled by a stream stop or disconnect
    #[error("{operation} aborted")]
    Aborted {
        /// Operation that was cancelled
        operation: &'static str,
    },

    /// A sync round trip took too long to be trusted
    #[error("Sync round trip of {round_trip_ms:.3}ms exceeds {threshold_ms}ms")]
    SyncRejected {
        /// Measured round trip
        round_trip_ms: f64,
        /// Configured threshold
        threshold_ms: f64,
    },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Reasons an operation is invalid in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// No transport is connected
    #[error("not connected")]
    NotConnected,

    /// The sample stream is not running
    #[error("not streaming")]
    NotStreaming,

    /// An impedance test is already running
    #[error("an impedance test is already running")]
    ImpedanceTestActive,

    /// A clock sync is already in progress
    #[error("a clock sync is already in progress")]
    TimeSyncPending,

    /// A reset or register query is already waiting for its reply
    #[error("a command is already waiting for its reply")]
    CommandPending,

    /// The board firmware does not support the operation
    #[error("board firmware does not support this operation")]
    UnsupportedFirmware,

    /// Nothing to stop
    #[error("not active")]
    NotActive,
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors from a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port failure
    #[cfg(feature = "usb")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// BLE failure
    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No matching device was found
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The transport was closed
    #[error("Transport closed")]
    Closed,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::from(StateError::NotStreaming);
        assert_eq!(err.to_string(), "Invalid state: not streaming");

        let err = SessionError::Timeout { operation: "soft reset", waited_ms: 500 };
        assert_eq!(err.to_string(), "soft reset timed out after 500ms");

        let err = SessionError::from(ValidationError::InvalidChannel { channel: 9, max: 8 });
        assert!(err.to_string().contains("Invalid channel 9"));
    }

    #[test]
    fn test_sync_rejected_display() {
        let err = SessionError::SyncRejected { round_trip_ms: 12.5, threshold_ms: 10.0 };
        assert_eq!(err.to_string(), "Sync round trip of 12.500ms exceeds 10ms");
    }
}
