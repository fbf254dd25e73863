pub mod connection;
pub mod errors;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{Connection, Connector};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};
