#![allow(dead_code)]

pub mod fake_connection;

use cafe_core::storage::credential::now_millis;
use cafe_core::{
    ClientConfig, ConnectionManager, Credential, CredentialStore, MemoryCredentialStore, SessionStore,
};
use fake_connection::{FakeConnector, FakeProbe, FakeRemote};
use log::LevelFilter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Logs will appear only when you run with `-- --nocapture`
/// or when the test fails.
pub fn init_logs() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn memory_session() -> (SessionStore, Arc<MemoryCredentialStore>) {
    let storage = Arc::new(MemoryCredentialStore::new());
    (SessionStore::new(storage.clone()), storage)
}

pub fn credential(token: &str, lifetime_ms: i64, permissions: &str) -> Credential {
    Credential::from_wire(
        json!({
            "name": "Ali",
            "username": "ali",
            "token": token,
            "exp": now_millis() + lifetime_ms,
            "permissions": permissions,
        }),
        now_millis(),
    )
    .expect("test credential is well formed")
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub session: SessionStore,
    pub storage: Arc<MemoryCredentialStore>,
    pub remotes: mpsc::UnboundedReceiver<FakeRemote>,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    /// A manager over fake transports; not connected yet.
    pub fn new() -> Self {
        init_logs();
        let (session, storage) = memory_session();
        let (connector, remotes, probe) = FakeConnector::new();
        let config = ClientConfig {
            endpoint: "fake://backend".into(),
            reconnect_delay: RECONNECT_DELAY,
            ..ClientConfig::default()
        };
        let manager = ConnectionManager::new(config, connector, session.clone());
        Self {
            manager,
            session,
            storage,
            remotes,
            probe,
        }
    }

    /// Connect and return the server side of the first transport.
    pub async fn connected() -> (Self, FakeRemote) {
        let mut harness = Self::new();
        harness.manager.connect();
        let remote = harness.next_remote().await;
        assert!(
            tokio::time::timeout(Duration::from_secs(1), harness.manager.wait_until_connected())
                .await
                .expect("timed out waiting for the connection"),
            "manager should report connected"
        );
        (harness, remote)
    }

    pub async fn next_remote(&mut self) -> FakeRemote {
        tokio::time::timeout(Duration::from_secs(10), self.remotes.recv())
            .await
            .expect("timed out waiting for a connect attempt")
            .expect("connector dropped")
    }

    /// The raw persisted credential record, if any.
    pub fn storage_record(&self) -> Option<String> {
        self.storage.load().expect("memory store never fails")
    }
}

pub async fn next_frame(remote: &mut FakeRemote) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_millis(200), remote.from_client.recv())
        .await
        .expect("timed out waiting for an outbound frame")
        .expect("transport dropped");
    serde_json::from_str(&frame).expect("outbound frame is JSON")
}
