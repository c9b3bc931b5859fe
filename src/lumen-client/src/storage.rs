//! Conversation persistence.
//!
//! A small key-value abstraction with a file-backed and an in-memory
//! implementation, and [`ChatStore`], which keeps the current conversation
//! under a single key and degrades gracefully when the store runs out of
//! room.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use lumen_protocol::ConversationTurn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key under which the conversation is stored.
pub const HISTORY_KEY: &str = "lumen-chat-history";

/// Current layout version of [`StoredChat`].
pub const STORAGE_VERSION: u32 = 1;

/// Turns kept on the last degradation step.
const MIN_KEPT_TURNS: usize = 10;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The value does not fit in the store.
    #[error("Storage quota exceeded ({needed} bytes needed, {limit} allowed)")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// File store
// ============================================================================

/// One file per key in a directory, guarded by file locks.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("File store initialized at {:?}", dir);
        Ok(Self { dir, quota: None })
    }

    /// The default location (`<data dir>/lumen`).
    pub fn default_location() -> Result<Self, StoreError> {
        let base = dirs::data_dir().or_else(dirs::home_dir).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "Home directory not found")
        })?;
        Self::new(base.join("lumen"))
    }

    /// Limit the total size of all stored values.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Bytes used by every stored value except `key`.
    fn used_by_others(&self, key_path: &Path) -> Result<u64, StoreError> {
        let mut used = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path() != key_path && entry.file_type()?.is_file() {
                used += entry.metadata()?.len();
            }
        }
        Ok(used)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        file.lock_shared()?;
        let mut content = String::new();
        let result = file.read_to_string(&mut content);
        file.unlock()?;

        result?;
        Ok(Some(content))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;

        if let Some(limit) = self.quota {
            let needed = self.used_by_others(&path)? + value.len() as u64;
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        file.lock_exclusive()?;
        let result = overwrite(&mut file, value.as_bytes());
        file.unlock()?;

        result?;
        debug!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn overwrite(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.write_all(bytes)?;
    file.flush()
}

// ============================================================================
// Memory store
// ============================================================================

/// In-process store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: u64) -> Self {
        Self {
            values: Mutex::default(),
            quota: Some(bytes),
        }
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values();
        if let Some(limit) = self.quota {
            let others: usize = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = (others + value.len()) as u64;
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values().remove(key);
        Ok(())
    }
}

// ============================================================================
// Chat store
// ============================================================================

/// Persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChat {
    pub version: u32,
    pub messages: Vec<ConversationTurn>,
    pub model: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Saves and restores the conversation.
#[derive(Clone)]
pub struct ChatStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore").finish_non_exhaustive()
    }
}

impl ChatStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Save the conversation, trimming the oldest turns if it does not fit.
    ///
    /// Tries the full history, then the newest half, then the last ten
    /// turns. Returns how many turns were written.
    pub fn save(&self, messages: &[ConversationTurn], model: Option<&str>) -> Result<usize, StoreError> {
        let half_start = messages.len() / 2;
        let min_start = messages.len().saturating_sub(MIN_KEPT_TURNS);

        let mut attempts = vec![0];
        for start in [half_start, min_start] {
            if attempts.last().is_some_and(|last| *last < start) {
                attempts.push(start);
            }
        }

        let mut last_error = None;
        for start in attempts {
            let kept = &messages[start..];
            match self.write(kept, model) {
                Ok(()) => {
                    if start > 0 {
                        warn!(
                            dropped = start,
                            kept = kept.len(),
                            "Storage quota exceeded, saved only the newest turns"
                        );
                    }
                    return Ok(kept.len());
                }
                Err(StoreError::QuotaExceeded { needed, limit }) => {
                    debug!(needed, limit, turns = kept.len(), "History does not fit");
                    last_error = Some(StoreError::QuotaExceeded { needed, limit });
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(StoreError::QuotaExceeded { needed: 0, limit: 0 }))
    }

    fn write(&self, messages: &[ConversationTurn], model: Option<&str>) -> Result<(), StoreError> {
        let chat = StoredChat {
            version: STORAGE_VERSION,
            messages: messages.to_vec(),
            model: model.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&chat)?;
        self.store.set(HISTORY_KEY, &json)
    }

    /// Load the saved conversation.
    ///
    /// A malformed entry or one written by another layout version is removed.
    pub fn load(&self) -> Result<Option<StoredChat>, StoreError> {
        let Some(raw) = self.store.get(HISTORY_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredChat>(&raw) {
            Ok(chat) if chat.version == STORAGE_VERSION => {
                info!(turns = chat.messages.len(), "Restored chat history");
                Ok(Some(chat))
            }
            Ok(chat) => {
                warn!(
                    found = chat.version,
                    expected = STORAGE_VERSION,
                    "Discarding chat history with unsupported version"
                );
                self.store.remove(HISTORY_KEY)?;
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed chat history");
                self.store.remove(HISTORY_KEY)?;
                Ok(None)
            }
        }
    }

    /// Remove the saved conversation.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(HISTORY_KEY)
    }
}
