//! Client error types.

use sockline_core::SessionId;
use sockline_settings::SettingsError;
use thiserror::Error;

/// Errors raised by a [`Connector`](crate::transport::Connector) or a live
/// socket.
///
/// These are recovered inside the connection by scheduling a reconnect;
/// callers of `send` never see them.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// URL that was dialed.
        url: String,
        /// Why the open failed.
        reason: String,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced to callers of the connection API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply arrived within the request timeout.
    #[error("request {session_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Session id of the request.
        session_id: SessionId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The request was destroyed before it completed.
    #[error("request {session_id} was cancelled")]
    Cancelled {
        /// Session id of the request.
        session_id: SessionId,
    },

    /// The connection actor has stopped.
    #[error("connection closed")]
    Closed,

    /// Settings rejected when building the connection.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
