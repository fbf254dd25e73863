use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_STORAGE_RECORD: &str = "cafe1908-account";

/// Settings shared by the session store and the connection manager.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend WebSocket URL.
    pub endpoint: String,
    /// Fixed pause between a detected disconnect and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Name of the durable credential record.
    pub storage_record: String,
    /// Frames that may wait for the transport before `send` reports `BufferFull`.
    pub outbound_capacity: usize,
    /// Inbound messages kept for slow subscribers before they start lagging.
    pub inbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            storage_record: DEFAULT_STORAGE_RECORD.to_string(),
            outbound_capacity: 32,
            inbound_capacity: 256,
        }
    }
}
