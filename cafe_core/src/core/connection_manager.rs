use crate::config::ClientConfig;
use crate::connections::connection::{Connection, Connector};
use crate::connections::errors::SendError;
use crate::core::envelope::{kinds, Envelope};
use crate::core::session::SessionStore;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Connectivity of the logical connection, as consumers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Between attempts, or not started yet.
    Disconnected,
    Connecting,
    Connected,
    /// Shut down for good.
    Closed,
}

/// State shared between the public handle and the supervisor task.
///
/// 1. The supervisor task owns the physical transport. It connects, runs the
///    I/O loop until the transport closes, waits `reconnect_delay` and starts
///    over, so there is never more than one transport or one pending attempt.
/// 2. The I/O loop reads frames from the transport, hands token refreshes to
///    the session and broadcasts everything else (via inbound_tx) to all
///    subscribers.
/// 3. `send` pushes encoded frames into `writer`, which the I/O loop drains
///    into the transport. `writer` is only `Some` while a transport is open.
struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    session: SessionStore,
    writer: Mutex<Option<mpsc::Sender<String>>>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: broadcast::Sender<Envelope>,
    last_tx: watch::Sender<Option<Envelope>>,
    alive: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    attempts: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// The single logical connection to the backend.
///
/// Cloning the ConnectionManager merely increases the reference count, so
/// every page, task or command can hold its own handle to the same
/// connection. The supervisor task keeps running until
/// [`ConnectionManager::shutdown`] is called.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>, session: SessionStore) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, _) = broadcast::channel(config.inbound_capacity.max(1));
        let (last_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                config,
                connector,
                session,
                writer: Mutex::new(None),
                state_tx,
                inbound_tx,
                last_tx,
                alive: AtomicBool::new(true),
                shutdown_tx,
                attempts: AtomicU64::new(0),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Connection manager talking WebSocket to `config.endpoint`.
    #[cfg(feature = "websocket")]
    pub fn websocket(config: ClientConfig, session: SessionStore) -> Self {
        let connector = crate::connections::WebSocketConnector::new(config.endpoint.clone());
        Self::new(config, Arc::new(connector), session)
    }

    /// Start the supervisor task: connect now and reconnect after every
    /// close until shut down. A second call while running does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        if !self.inner.alive.load(Ordering::SeqCst) {
            warn!(
                "Connection manager for '{}' is shut down, not connecting",
                self.inner.config.endpoint
            );
            return;
        }
        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.is_some() {
            warn!(
                "Already connected or connecting to '{}'",
                self.inner.config.endpoint
            );
            return;
        }
        *supervisor = Some(tokio::spawn(supervise(self.inner.clone())));
    }

    /// Wrap `payload` as `{type, message, token}` and queue it for the
    /// transport. The token is read from the session right now.
    ///
    /// Fails fast (and logs) when there is no transport, the transport isn't
    /// open or the payload isn't a JSON object/array. Nothing is queued
    /// across reconnects.
    pub fn send(&self, payload: Value, msg_type: &str) -> Result<(), SendError> {
        if self.inner.supervisor.lock().is_none() {
            error!("Transport instance is not available");
            return Err(SendError::NoTransport);
        }
        let Some(writer) = self.inner.writer.lock().clone() else {
            error!("Transport is not connected, dropping '{}' message", msg_type);
            return Err(SendError::NotConnected);
        };
        if !(payload.is_object() || payload.is_array()) {
            error!("Message must be a JSON object, dropping '{}' message", msg_type);
            return Err(SendError::InvalidPayload);
        }

        let envelope = Envelope::new(msg_type, payload, self.inner.session.token());
        let frame = serde_json::to_string(&envelope).map_err(|e| {
            error!("Failed to encode '{}' message: {}", msg_type, e);
            SendError::from(e)
        })?;

        writer.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => {
                error!("Outbound buffer full, dropping '{}' message", msg_type);
                SendError::BufferFull
            }
            TrySendError::Closed(_) => {
                error!("Transport closed, dropping '{}' message", msg_type);
                SendError::NotConnected
            }
        })
    }

    /// Every inbound application message (token refreshes excluded).
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_to_any(&[])
    }

    /// Inbound messages of one `type`.
    pub fn subscribe_to(&self, msg_type: &str) -> Subscription {
        self.subscribe_to_any(&[msg_type])
    }

    /// Inbound messages whose `type` is one of `msg_types`. An empty list
    /// matches every type.
    pub fn subscribe_to_any(&self, msg_types: &[&str]) -> Subscription {
        Subscription {
            msg_types: msg_types.iter().map(|t| t.to_string()).collect(),
            rx: self.inner.inbound_tx.subscribe(),
            shutdown_rx: self.inner.shutdown_tx.subscribe(),
        }
    }

    /// The most recent inbound application message, paired with its type.
    pub fn last_message(&self) -> Option<Envelope> {
        self.inner.last_tx.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<Envelope>> {
        self.inner.last_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolves once a transport is open (`true`) or the manager was shut
    /// down (`false`).
    pub async fn wait_until_connected(&self) -> bool {
        let mut state = self.watch_state();
        let result = state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
            .await;
        matches!(result.as_deref(), Ok(ConnectionState::Connected))
    }

    /// Physical connect attempts made so far, the first one included.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Cancel any pending reconnect, close the open transport and wait for
    /// the supervisor to finish. Later calls return immediately.
    pub async fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            debug!("Connection manager already shut down");
            return;
        }
        self.inner.shutdown_tx.send_replace(true);

        let supervisor = self.inner.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                error!("Connection supervisor ended abnormally: {}", e);
            }
        }
        self.inner.writer.lock().take();
        self.inner.state_tx.send_replace(ConnectionState::Closed);
        info!(
            "Connection manager for '{}' shut down",
            self.inner.config.endpoint
        );
    }
}

/// Connect, serve, wait, repeat. One attempt at a time.
async fn supervise(shared: Arc<Shared>) {
    let endpoint = shared.config.endpoint.clone();
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    while shared.alive.load(Ordering::SeqCst) {
        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        shared.state_tx.send_replace(ConnectionState::Connecting);
        debug!("Connect attempt {} to '{}'", attempt, endpoint);

        let mut conn = shared.connector.create();
        let opened = tokio::select! {
            result = conn.connect() => Some(result),
            _ = stopped(&mut shutdown_rx) => None,
        };
        match opened {
            None => break,
            Some(Ok(())) => shared.run_io(&mut *conn, &mut shutdown_rx).await,
            Some(Err(e)) => error!("Failed to connect to '{}': {}", endpoint, e),
        }
        shared.state_tx.send_replace(ConnectionState::Disconnected);

        if !shared.alive.load(Ordering::SeqCst) {
            break;
        }
        info!(
            "Reconnecting to '{}' in {} ms",
            endpoint,
            shared.config.reconnect_delay.as_millis()
        );
        tokio::select! {
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {},
            _ = stopped(&mut shutdown_rx) => break,
        }
    }

    shared.writer.lock().take();
    shared.state_tx.send_replace(ConnectionState::Closed);
    info!("Connection supervisor for '{}' stopped", endpoint);
}

/// Resolves once shutdown is requested (or the manager is gone).
///
/// The `watch::Ref` returned by `wait_for` is dropped in here so it never
/// ends up in a `select!` output held across an await.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

impl Shared {
    /// Serve one open transport until it closes, fails or shutdown is requested.
    /// The transport is disconnected exactly once on the way out.
    async fn run_io(
        &self,
        conn: &mut (dyn Connection + Send + Unpin),
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let endpoint = &self.config.endpoint;
        let (write_tx, mut write_rx) = mpsc::channel::<String>(self.config.outbound_capacity.max(1));
        *self.writer.lock() = Some(write_tx);
        self.state_tx.send_replace(ConnectionState::Connected);
        info!("Connected to '{}'", endpoint);

        loop {
            // This implicitly awaits concurrently for the shutdown signal,
            // the outbound queue and the transport read.
            tokio::select! {
                _ = stopped(shutdown_rx) => {
                    info!("Shutdown received for '{}'. Closing transport.", endpoint);
                    break;
                },
                Some(frame) = write_rx.recv() => {
                    debug!("Write: {} to '{}'", frame, endpoint);
                    if let Err(e) = conn.write(&frame).await {
                        error!("Write error on '{}': {}", endpoint, e);
                        break;
                    }
                },
                result = conn.read() => match result {
                    Ok(Some(frame)) => self.dispatch(&frame),
                    Ok(None) => {
                        info!("Disconnected from '{}'", endpoint);
                        break;
                    },
                    Err(e) => {
                        error!("Read error on '{}': {}", endpoint, e);
                        break;
                    },
                },
            }
        }

        self.writer.lock().take();
        if let Err(e) = conn.disconnect().await {
            debug!("Disconnect error on '{}': {}", endpoint, e);
        }
    }

    fn dispatch(&self, frame: &str) {
        let envelope: Envelope = match serde_json::from_str(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed frame from '{}': {}", self.config.endpoint, e);
                return;
            }
        };

        if envelope.is(kinds::UPDATE_TOKEN) {
            debug!("Token refresh received");
            // Merged inline so frames read after the refresh see the new token.
            // The record store is a small file; move this off the I/O loop if
            // a slower store is ever plugged in.
            if let Err(e) = self.session.merge(envelope.message) {
                warn!("Token refresh dropped: {}", e);
            }
            return;
        }

        if envelope.is(kinds::SESSION_INVALIDATED) {
            warn!(
                "Session invalidated by the server: {}",
                envelope.text().unwrap_or("another session took over")
            );
            self.session.deactivate();
        }

        debug!("Received '{}' message", envelope.msg_type);
        self.last_tx.send_replace(Some(envelope.clone()));
        // Having no subscribers is fine; the message is still the last message.
        let _ = self.inbound_tx.send(envelope);
    }
}

/// A receiver that only yields messages of the types it was created for.
pub struct Subscription {
    msg_types: Vec<String>,
    rx: broadcast::Receiver<Envelope>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Subscription {
    /// Next matching message. `None` once the connection manager is shut
    /// down and every message published before that has been received.
    ///
    /// A subscriber that falls more than `inbound_capacity` messages behind
    /// skips the oldest ones; the gap is logged.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let Self {
            msg_types,
            rx,
            shutdown_rx,
        } = self;
        loop {
            let received = tokio::select! {
                biased;
                received = rx.recv() => received,
                _ = stopped(shutdown_rx) => return None,
            };
            match received {
                Ok(envelope) if msg_types.is_empty() || msg_types.iter().any(|t| envelope.is(t)) => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {:?} lagged, {} messages skipped", msg_types, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Types this subscription matches; empty means all of them.
    pub fn msg_types(&self) -> &[String] {
        &self.msg_types
    }
}
