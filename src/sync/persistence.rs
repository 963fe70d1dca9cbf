//! Local persistence of the session identity.
//!
//! A single durable slot holding `{sessionCode, role, since}`. Overwritten on
//! create/join, removed on leave, read on resume.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::identity::SessionIdentity;

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Storage cannot be read or written
    Unavailable(String),
    /// Stored data cannot be decoded
    Corrupt(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Local storage unavailable: {}", msg),
            Self::Corrupt(msg) => write!(f, "Stored session is corrupt: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Single-slot durable storage for the session identity.
pub trait IdentityStore: Send {
    fn get(&self) -> Result<Option<SessionIdentity>, PersistenceError>;
    fn set(&mut self, identity: &SessionIdentity) -> Result<(), PersistenceError>;
    fn remove(&mut self) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
struct Slot {
    identity: Option<SessionIdentity>,
    unavailable: bool,
}

/// In-memory identity store.
///
/// Clones share the same slot, so a clone handed to a second manager sees
/// what the first one persisted, like a page reload would.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    slot: Arc<Mutex<Slot>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with an identity.
    pub fn with_identity(identity: SessionIdentity) -> Self {
        let store = Self::new();
        if let Ok(mut slot) = store.slot.lock() {
            slot.identity = Some(identity);
        }
        store
    }

    /// Simulate storage going away (private browsing, full disk, ...).
    pub fn set_available(&self, available: bool) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.unavailable = !available;
        }
    }

    /// Current slot content, bypassing availability.
    pub fn peek(&self) -> Option<SessionIdentity> {
        self.slot.lock().ok().and_then(|slot| slot.identity.clone())
    }

    fn with_slot<T>(&self, f: impl FnOnce(&mut Slot) -> T) -> Result<T, PersistenceError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| PersistenceError::Unavailable("slot lock poisoned".to_string()))?;
        if slot.unavailable {
            return Err(PersistenceError::Unavailable("storage disabled".to_string()));
        }
        Ok(f(&mut slot))
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self) -> Result<Option<SessionIdentity>, PersistenceError> {
        self.with_slot(|slot| slot.identity.clone())
    }

    fn set(&mut self, identity: &SessionIdentity) -> Result<(), PersistenceError> {
        self.with_slot(|slot| slot.identity = Some(identity.clone()))
    }

    fn remove(&mut self) -> Result<(), PersistenceError> {
        self.with_slot(|slot| slot.identity = None)
    }
}

/// Identity store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn unavailable(err: io::Error) -> PersistenceError {
    PersistenceError::Unavailable(err.to_string())
}

impl IdentityStore for FileIdentityStore {
    fn get(&self) -> Result<Option<SessionIdentity>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(unavailable(err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| PersistenceError::Corrupt(err.to_string()))
    }

    fn set(&mut self, identity: &SessionIdentity) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(unavailable)?;
            }
        }
        let contents = serde_json::to_string_pretty(identity)
            .map_err(|err| PersistenceError::Corrupt(err.to_string()))?;
        fs::write(&self.path, contents).map_err(unavailable)
    }

    fn remove(&mut self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(unavailable(err)),
        }
    }
}
