pub mod config;
pub mod connections;
pub mod core;
pub mod storage;
pub mod utils;

// re‑export ergonomic entry points
pub use crate::config::ClientConfig;
pub use crate::core::connection_manager::{ConnectionManager, ConnectionState, Subscription};
pub use crate::core::envelope::{kinds, Envelope, ReplyStatus};
pub use crate::core::permissions::{Permission, PermissionSet};
pub use crate::core::session::{SessionError, SessionStore};
pub use crate::storage::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
