//! Control-protocol error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur while talking to the control endpoint.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Socket-level failure (dial, read, write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection closed while work was still outstanding.
    #[error("Connection closed")]
    Closed,

    /// The server rejected the identify handshake.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No matching response arrived within the per-request timeout.
    #[error("Request {request_type} timed out after {timeout_ms}ms")]
    RequestTimeout {
        request_type: String,
        timeout_ms: u64,
    },

    /// The server answered the request with a failure status.
    #[error("Request {request_type} failed with code {code}")]
    RequestFailed {
        request_type: String,
        code: i32,
        comment: Option<String>,
    },

    /// Malformed or unexpected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation requires an identified connection.
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encode/decode errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControlError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
