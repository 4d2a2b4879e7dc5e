//! Durable store for the conversation ledger.
//!
//! The ledger is persisted as one JSON blob under a fixed key of a simple
//! key-value store. Store failures never propagate: reads degrade to "no
//! snapshot", writes are retried once and then dropped with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::ledger::{LedgerSnapshot, SNAPSHOT_VERSION};

/// Key the ledger snapshot is stored under.
pub const LEDGER_KEY: &str = "tutorstream.chat_history";

/// Minimal async key-value slot storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        // Write to a sibling temp file first so a crash never leaves a
        // half-written snapshot behind.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}

/// In-process store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Saves and restores ledger snapshots under [`LEDGER_KEY`].
pub struct LedgerStore {
    backend: Box<dyn KeyValueStore>,
    key: String,
}

impl LedgerStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            key: LEDGER_KEY.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Load the stored snapshot. Missing, unreadable or corrupt data all
    /// yield `None`, as does a snapshot written in another format version.
    pub async fn load(&self) -> Option<LedgerSnapshot> {
        let raw = match self.backend.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "no stored conversation");
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored conversation: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<LedgerSnapshot>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    version = snapshot.version,
                    expected = SNAPSHOT_VERSION,
                    "Stored conversation has an unknown format version, starting empty"
                );
                None
            }
            Err(e) => {
                warn!("Stored conversation is corrupt, starting empty: {}", e);
                None
            }
        }
    }

    /// Persist a snapshot. Retries once; returns whether the write landed.
    pub async fn save(&self, snapshot: &LedgerSnapshot) -> bool {
        let json = match serde_json::to_string(snapshot).map_err(StoreError::Encode) {
            Ok(json) => json,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };

        for attempt in 1..=2 {
            match self.backend.put(&self.key, &json).await {
                Ok(()) => return true,
                Err(e) => warn!(attempt, "Failed to save conversation: {}", e),
            }
        }
        false
    }

    /// Drop the stored snapshot.
    pub async fn clear(&self) {
        if let Err(e) = self.backend.remove(&self.key).await {
            warn!("Failed to remove stored conversation: {}", e);
        }
    }
}
