//! A deterministic **in‑process stand‑in** for the backend transport.
//!
//! *  **From the test’s perspective**
//!    * Every connect attempt hands the test a [`FakeRemote`] through the
//!      receiver returned by [`FakeConnector::new`].
//!    * Push “incoming” frames with `remote.push(frame).await`.
//!    * Make the transport fail with `remote.fail_read().await` (the pending
//!      read errors) or `remote.fail_writes()` (every later write errors).
//!    * Read what the manager wrote with `remote.from_client.recv().await`.
//!    * Drop the remote (or call [`FakeRemote::close`]) to simulate the server
//!      closing the connection.
//!    * [`FakeProbe`] counts connects, disconnects and writes across all attempts.
//!
//! It lets integration tests exercise the *real* async machinery (supervisor,
//! channels, broadcasts, timers) without opening a socket.

#![allow(dead_code)]

use async_trait::async_trait;
use cafe_core::connections::{connection::Connection, connection::Connector, errors::ConnectionError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Counters shared by every connection a [`FakeConnector`] creates.
#[derive(Default)]
pub struct FakeProbe {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub writes: AtomicUsize,
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    /// Connect attempts that should fail before one succeeds.
    pub refuse_next: AtomicUsize,
    pub connect_times: Mutex<Vec<Instant>>,
}

impl FakeProbe {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().clone()
    }
}

/// What the next `read` on the client side yields.
pub enum Inbound {
    Frame(String),
    Error,
}

/// The server side of one fake transport.
pub struct FakeRemote {
    /// Items *pushed by the test* → appear as data read from the server.
    pub to_client: mpsc::Sender<Inbound>,
    /// Frames written by the manager → sent back to the test.
    pub from_client: mpsc::UnboundedReceiver<String>,
    writes_fail: Arc<AtomicBool>,
}

impl FakeRemote {
    pub async fn push(&self, frame: &str) {
        self.to_client
            .send(Inbound::Frame(frame.to_owned()))
            .await
            .expect("client side of the fake transport is gone");
    }

    /// The client's next read returns a transport error.
    pub async fn fail_read(&self) {
        self.to_client
            .send(Inbound::Error)
            .await
            .expect("client side of the fake transport is gone");
    }

    /// Every later write on this transport returns an error.
    pub fn fail_writes(&self) {
        self.writes_fail.store(true, Ordering::SeqCst);
    }

    /// Server-initiated close.
    pub fn close(self) {}
}

pub struct FakeConnection {
    to_client_rx: mpsc::Receiver<Inbound>,
    from_client_tx: mpsc::UnboundedSender<String>,
    writes_fail: Arc<AtomicBool>,
    probe: Arc<FakeProbe>,
    is_open: bool,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.probe.connect_times.lock().push(Instant::now());

        let refuse = self
            .probe
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(ConnectionError::Other("connection refused".into()));
        }

        let open = self.probe.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_open.fetch_max(open, Ordering::SeqCst);
        self.is_open = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.is_open {
            self.is_open = false;
            self.probe.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn write(&mut self, frame: &str) -> Result<(), ConnectionError> {
        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::Other("broken pipe".into()));
        }
        // The test may have dropped its receiver; the write still counts.
        let _ = self.from_client_tx.send(frame.to_owned());
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<String>, ConnectionError> {
        match self.to_client_rx.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Error) => Err(ConnectionError::Other("connection reset".into())),
            None => Ok(None),
        }
    }
}

/// Hands out a fresh [`FakeConnection`] per connect attempt and its
/// [`FakeRemote`] to the test.
pub struct FakeConnector {
    remotes_tx: mpsc::UnboundedSender<FakeRemote>,
    probe: Arc<FakeProbe>,
}

impl FakeConnector {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<FakeRemote>,
        Arc<FakeProbe>,
    ) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        let probe = Arc::new(FakeProbe::default());
        (
            Arc::new(Self {
                remotes_tx,
                probe: probe.clone(),
            }),
            remotes_rx,
            probe,
        )
    }
}

impl Connector for FakeConnector {
    fn create(&self) -> Box<dyn Connection + Send + Unpin> {
        let (to_client, to_client_rx) = mpsc::channel(32);
        let (from_client_tx, from_client) = mpsc::unbounded_channel();
        let writes_fail = Arc::new(AtomicBool::new(false));
        let _ = self.remotes_tx.send(FakeRemote {
            to_client,
            from_client,
            writes_fail: writes_fail.clone(),
        });
        Box::new(FakeConnection {
            to_client_rx,
            from_client_tx,
            writes_fail,
            probe: self.probe.clone(),
            is_open: false,
        })
    }
}
