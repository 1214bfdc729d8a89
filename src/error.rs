//! Error types for mutation-server-client.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::RpcError;
use crate::server::ServerState;

/// Main error type for all mutation server operations.
#[derive(Debug, Error)]
pub enum MutationServerError {
    /// I/O error during socket or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server configuration is unusable (e.g. no executable path).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine process could not be spawned.
    #[error("Failed to spawn mutation server: {0}")]
    Spawn(String),

    /// The engine never announced its port.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The port banner was not seen in time.
    #[error("Mutation server did not announce its port within {0:?}")]
    HandshakeTimeout(Duration),

    /// The socket did not open in time.
    #[error("Connection to mutation server did not open within {0:?}")]
    OpenTimeout(Duration),

    /// Protocol error (malformed envelope, oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine answered with an error payload.
    #[error("Mutation server returned error: {0}")]
    Rpc(RpcError),

    /// Connection closed; pending requests are failed with this.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// `send` was called before the socket reached `Open`.
    #[error("Socket is not open")]
    NotOpen,

    /// Operation invoked on a server that is not `Ready`.
    #[error("Mutation server is not ready (state: {state:?})")]
    NotReady {
        /// State the server was in.
        state: ServerState,
    },

    /// No response arrived for a request in time.
    #[error("Request '{method}' timed out after {after:?}")]
    RequestTimeout {
        /// Method of the request.
        method: String,
        /// Configured timeout.
        after: Duration,
    },

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using MutationServerError.
pub type Result<T> = std::result::Result<T, MutationServerError>;
