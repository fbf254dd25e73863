use thiserror::Error;

/// A central error enum for transport-related errors.
///
/// None of these reach the callers of `ConnectionManager::send`; they are
/// logged by the I/O task and end the current transport, which schedules a
/// reconnect.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Other error: {0}")]
    Other(String),
}

/// Why an outbound message was refused before reaching the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport instance is not available")]
    NoTransport,

    #[error("transport is not connected")]
    NotConnected,

    #[error("message must be a JSON object or array")]
    InvalidPayload,

    #[error("outbound buffer is full")]
    BufferFull,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
