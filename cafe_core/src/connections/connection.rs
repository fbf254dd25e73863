use super::errors::ConnectionError;
use async_trait::async_trait;

/// A message-oriented transport to the backend (WebSocket in production,
/// an in-process fake in tests).
///
/// Frames are whole JSON documents; the transport never splits or joins them.
#[async_trait]
pub trait Connection {
    async fn connect(&mut self) -> Result<(), ConnectionError>;
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;

    async fn write(&mut self, frame: &str) -> Result<(), ConnectionError>;
    /// Next inbound text frame. `Ok(None)` means the peer closed the transport.
    async fn read(&mut self) -> Result<Option<String>, ConnectionError>;
}

/// Builds a fresh, *not-yet-connected* transport for every connect attempt.
pub trait Connector: Send + Sync {
    fn create(&self) -> Box<dyn Connection + Send + Unpin>;
}
