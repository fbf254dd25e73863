use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::permissions::{Permission, PermissionSet};
use crate::storage::credential::{normalize_expiry, now_millis, Credential};
use crate::storage::store::{CredentialStore, StorageError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("credential is malformed: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("credential has expired")]
    Expired,

    #[error("no stored session to refresh")]
    NoSession,

    #[error("token refresh must be a JSON object")]
    InvalidRefresh,

    #[error("missing required permissions '{required}'")]
    Unauthorized { required: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Who is logged in and what they may do.
///
/// Cloning is cheap; every clone talks to the same session. The credential
/// lives in memory and in the [`CredentialStore`], and an expiry timer logs
/// the session out once `exp` passes. At most one timer is pending at any
/// time: re-activation aborts the old one, and a generation counter turns any
/// timer that already woke up into a no-op.
///
/// Activation spawns the timer on the ambient tokio runtime.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn CredentialStore>,
    state: Mutex<State>,
    active_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    credential: Option<Credential>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl State {
    fn live_credential(&self) -> Option<&Credential> {
        self.credential
            .as_ref()
            .filter(|c| !c.is_expired(now_millis()))
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn CredentialStore>) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                storage,
                state: Mutex::new(State::default()),
                active_tx,
            }),
        }
    }

    /// Restore the persisted session, if there is a usable one.
    ///
    /// A missing, unreadable, malformed or expired record leaves the session
    /// logged out (and the record erased). Returns whether a session is active.
    pub fn initialize(&self) -> bool {
        let record = match self.inner.storage.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No stored session");
                self.deactivate();
                return false;
            }
            Err(e) => {
                error!("Failed to read stored session: {}", e);
                self.deactivate();
                return false;
            }
        };

        let credential = match serde_json::from_str::<Credential>(&record) {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Stored session is malformed, clearing it: {}", e);
                self.deactivate();
                return false;
            }
        };

        let Some(left) = credential.remaining(now_millis()) else {
            warn!("Session expired.");
            self.deactivate();
            return false;
        };

        info!(
            "Restored session for '{}' ({} s left)",
            credential.username,
            left.as_secs()
        );
        let mut state = self.inner.state.lock();
        self.install(&mut state, credential, left);
        true
    }

    /// Persist `credential` and make it the active session.
    pub fn activate(&self, credential: Credential) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock();
        self.activate_locked(&mut state, credential)
    }

    /// Apply a server-pushed partial credential on top of the stored one.
    ///
    /// Never creates a session: without a valid stored credential the refresh
    /// is dropped with a warning and nothing changes.
    pub fn merge(&self, partial: Value) -> Result<(), SessionError> {
        let Value::Object(mut partial) = partial else {
            warn!("Token refresh is not an object, ignoring it");
            return Err(SessionError::InvalidRefresh);
        };

        let mut state = self.inner.state.lock();

        let stored = match self.inner.storage.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!("Token refresh without a stored session, ignoring it");
                return Err(SessionError::NoSession);
            }
            Err(e) => {
                warn!("Token refresh dropped, stored session unreadable: {}", e);
                return Err(e.into());
            }
        };

        let mut fields = match serde_json::from_str::<Value>(&stored) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                warn!("Stored account props is not an object, ignoring token refresh");
                return Err(SessionError::NoSession);
            }
            Err(e) => {
                warn!("Stored session is malformed, ignoring token refresh: {}", e);
                return Err(SessionError::Malformed(e));
            }
        };

        let now = now_millis();
        match serde_json::from_value::<Credential>(Value::Object(fields.clone())) {
            Ok(current) if !current.is_expired(now) => {}
            Ok(_) => {
                warn!("Stored session already expired, ignoring token refresh");
                return Err(SessionError::NoSession);
            }
            Err(e) => {
                warn!("Stored session is malformed, ignoring token refresh: {}", e);
                return Err(SessionError::Malformed(e));
            }
        }

        normalize_expiry(&mut partial, now);
        let superseded = match (fields.get("token"), partial.get("token")) {
            (Some(Value::String(old)), Some(Value::String(new)))
                if old != new && !partial.contains_key("oldToken") =>
            {
                Some(old.clone())
            }
            _ => None,
        };
        if let Some(old) = superseded {
            partial.insert("oldToken".into(), Value::String(old));
        }

        fields.extend(partial);
        let merged = serde_json::from_value::<Credential>(Value::Object(fields)).map_err(|e| {
            warn!("Token refresh produced an invalid credential: {}", e);
            SessionError::Malformed(e)
        })?;

        debug!("Merged token refresh for '{}'", merged.username);
        self.activate_locked(&mut state, merged)
    }

    /// Log out: cancel the timer, erase the record, forget the credential.
    /// Safe to call any number of times.
    pub fn deactivate(&self) {
        let mut state = self.inner.state.lock();
        let was_active = state.credential.is_some();
        self.clear_locked(&mut state);
        if was_active {
            info!("Logged out");
        }
    }

    /// Cancel the pending expiry timer but keep the persisted record, so the
    /// next [`SessionStore::initialize`] picks the session up again.
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        debug!("Session store disposed");
    }

    /// Permission check against a code string such as `"bc"`.
    ///
    /// The full-access code always passes. `full_match` demands every code
    /// (an empty string passes), otherwise any one code suffices (an empty
    /// string fails).
    pub fn check_permissions(&self, required: &str, full_match: bool) -> bool {
        self.check(&PermissionSet::from_codes(required), full_match)
    }

    pub fn check(&self, required: &PermissionSet, full_match: bool) -> bool {
        let state = self.inner.state.lock();
        match state.live_credential() {
            Some(credential) => credential.permissions.satisfies(required, full_match),
            None => PermissionSet::new().satisfies(required, full_match),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.check(&std::iter::once(permission).collect(), true)
    }

    /// Guard form of [`SessionStore::check_permissions`].
    pub fn authorize(&self, required: &str, full_match: bool) -> Result<(), SessionError> {
        if self.check_permissions(required, full_match) {
            Ok(())
        } else {
            Err(SessionError::Unauthorized {
                required: required.to_owned(),
            })
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().live_credential().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .live_credential()
            .map(|c| c.token.clone())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.state.lock().live_credential().cloned()
    }

    /// Was `token` issued to this session (now or before its last refresh)?
    pub fn is_own_token(&self, token: &str) -> bool {
        let state = self.inner.state.lock();
        state
            .live_credential()
            .is_some_and(|c| c.token == token || c.old_token.as_deref() == Some(token))
    }

    /// Flips to `false` on logout and expiry.
    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.inner.active_tx.subscribe()
    }

    fn activate_locked(&self, state: &mut State, credential: Credential) -> Result<(), SessionError> {
        let Some(left) = credential.remaining(now_millis()) else {
            warn!(
                "Refusing to activate expired credential for '{}'",
                credential.username
            );
            self.clear_locked(state);
            return Err(SessionError::Expired);
        };

        let record = serde_json::to_string(&credential).map_err(StorageError::from)?;
        self.inner.storage.save(&record)?;

        info!(
            "Session active for '{}' ({} s left)",
            credential.username,
            left.as_secs()
        );
        self.install(state, credential, left);
        Ok(())
    }

    fn install(&self, state: &mut State, credential: Credential, left: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.timer = self.arm_timer(state.generation, left);
        state.credential = Some(credential);
        self.inner.active_tx.send_replace(true);
    }

    fn arm_timer(&self, generation: u64, left: Duration) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("No tokio runtime, session expiry timer not armed");
                return None;
            }
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(runtime.spawn(async move {
            tokio::time::sleep(left).await;
            if let Some(inner) = weak.upgrade() {
                SessionStore { inner }.expire(generation);
            }
        }))
    }

    fn expire(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            debug!("Ignoring superseded expiry timer");
            return;
        }
        // This is the timer task itself; let it finish instead of aborting it.
        drop(state.timer.take());
        info!("Session expired, logging out");
        self.clear_locked(&mut state);
    }

    fn clear_locked(&self, state: &mut State) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        if let Err(e) = self.inner.storage.remove() {
            error!("Failed to erase stored session: {}", e);
        }
        state.credential = None;
        self.inner.active_tx.send_replace(false);
    }
}
