pub mod credential;
pub mod store;

pub use credential::Credential;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StorageError};
