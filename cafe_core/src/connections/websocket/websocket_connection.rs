use crate::connections::{connection::Connection, connection::Connector, errors::ConnectionError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket transport speaking JSON text frames.
pub struct WebSocketConnection {
    url: String,
    stream: Option<WsStream>,
}

impl WebSocketConnection {
    pub fn new(url: String) -> Self {
        Self { url, stream: None }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        info!("Connecting to WebSocket server at {}", self.url);
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!("WebSocket handshake status: {}", response.status());
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; a failed close handshake is not an error for us.
            if let Err(e) = stream.close(None).await {
                debug!("Close handshake with {} failed: {}", self.url, e);
            }
        }
        Ok(())
    }

    async fn write(&mut self, frame: &str) -> Result<(), ConnectionError> {
        match &mut self.stream {
            Some(stream) => {
                stream.send(Message::Text(frame.to_owned().into())).await?;
                Ok(())
            }
            None => Err(ConnectionError::Other("Not connected".into())),
        }
    }

    async fn read(&mut self) -> Result<Option<String>, ConnectionError> {
        let Some(stream) = &mut self.stream else {
            return Err(ConnectionError::Other("Not connected".into()));
        };
        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("Ignoring non UTF-8 binary frame from {}", self.url),
                },
                Message::Close(frame) => {
                    debug!("Close frame from {}: {:?}", self.url, frame);
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite itself
                _ => {}
            }
        }
        Ok(None)
    }
}

/// Creates a new [`WebSocketConnection`] to the same endpoint for every
/// connect attempt.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WebSocketConnector {
    fn create(&self) -> Box<dyn Connection + Send + Unpin> {
        Box::new(WebSocketConnection::new(self.url.clone()))
    }
}
