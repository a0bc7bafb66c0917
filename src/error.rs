//! Error types for chatwire.

use thiserror::Error;

use crate::command::ConnectionId;
use crate::server::ServerState;

/// Main error type for all chatwire operations.
#[derive(Debug, Error)]
pub enum ChatwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (file-transfer header only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Output buffer cannot hold header + payload. Nothing was written.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Payload exceeds the configured maximum frame size.
    #[error("Payload size {len} exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: u32 },

    /// Protocol violation on an incoming stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client session loop was stopped, so a blocking send cannot complete.
    #[error("Session is not running")]
    SessionStopped,

    /// No live connection with this id (closed, or never existed).
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Address is not an IP literal.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation requires a stopped server.
    #[error("Server is not stopped (state: {0:?})")]
    NotStopped(ServerState),

    /// The multiplexer thread could not be started and the server cannot be restarted.
    #[error("Server is unavailable")]
    ServerUnavailable,
}

impl ChatwireError {
    /// Numeric error code: the OS error number where one exists, 0 otherwise.
    pub fn code(&self) -> i32 {
        match self {
            ChatwireError::Io(e) => e.raw_os_error().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Result type alias using ChatwireError.
pub type Result<T> = std::result::Result<T, ChatwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_for_os_error() {
        let err = ChatwireError::Io(std::io::Error::from_raw_os_error(32));
        assert_eq!(err.code(), 32);
    }

    #[test]
    fn test_code_for_logical_errors_is_zero() {
        assert_eq!(ChatwireError::ConnectionClosed.code(), 0);
        assert_eq!(
            ChatwireError::BufferTooSmall {
                needed: 10,
                available: 4
            }
            .code(),
            0
        );
        let synthetic = ChatwireError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write returned 0",
        ));
        assert_eq!(synthetic.code(), 0);
    }

    #[test]
    fn test_display_messages() {
        let err = ChatwireError::PayloadTooLarge { len: 200, max: 100 };
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
