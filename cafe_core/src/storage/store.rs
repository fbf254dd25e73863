use std::{fs, io, path::PathBuf};

use directories::ProjectDirs;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] io::Error),

    #[error("stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unable to locate config dir")]
    NoConfigDir,
}

/// Durable home of the one serialized credential record.
///
/// Stores deal in raw JSON text: a corrupt record must still be readable so
/// the session layer can log it and clear it.
pub trait CredentialStore: Send + Sync {
    /// The stored record, `Ok(None)` when there is none.
    fn load(&self) -> Result<Option<String>, StorageError>;
    /// Create or overwrite the record.
    fn save(&self, record: &str) -> Result<(), StorageError>;
    /// Delete the record (`Ok(true)` if removed, `Ok(false)` if it didn't exist).
    fn remove(&self) -> Result<bool, StorageError>;
}

/// A JSON file named after the record.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// `~/.config/cafe_client/session/<record>.json` on Linux,
    /// `%APPDATA%\cafe_client\session\<record>.json` on Windows, etc.
    pub fn new(record: &str) -> Result<Self, StorageError> {
        let proj = ProjectDirs::from("", "", "cafe_client").ok_or(StorageError::NoConfigDir)?;
        Self::in_dir(proj.config_dir().join("session"), record)
    }

    /// Keep the record in an explicit directory (created if missing).
    pub fn in_dir(dir: PathBuf, record: &str) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(format!("{record}.json")),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &str) -> Result<(), StorageError> {
        fs::write(&self.path, record)?;
        Ok(())
    }

    fn remove(&self) -> Result<bool, StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, for tests and clients that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(record.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, record: &str) -> Result<(), StorageError> {
        *self.record.lock() = Some(record.to_owned());
        Ok(())
    }

    fn remove(&self) -> Result<bool, StorageError> {
        Ok(self.record.lock().take().is_some())
    }
}
