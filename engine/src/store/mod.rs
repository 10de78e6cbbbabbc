/// Durable per-user storage
///
/// Conversation state (recent window, summaries, profile) is mirrored to a
/// `DurableStore` so it survives restarts. Stores are slow and may fail;
/// callers never wait on a write. Writes go through the ordered
/// [`PersistWriter`], which applies them one at a time in enqueue order.
///
/// Two implementations ship:
/// - [`FileStore`]: one JSON file per user and kind under the data directory
/// - [`MemoryStore`]: process-local map for ephemeral sessions and tests
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

pub mod file;
pub mod writer;

// Re-export commonly used types
pub use file::FileStore;
pub use writer::PersistWriter;

/// Errors raised by a durable store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

/// What part of a user's state a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKind {
    Window,
    Summaries,
    Profile,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [StoreKind::Window, StoreKind::Summaries, StoreKind::Profile];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Window => "window",
            StoreKind::Summaries => "summaries",
            StoreKind::Profile => "profile",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user storage footprint
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StorageStats {
    /// File name to size in bytes
    pub files: BTreeMap<String, u64>,
    pub total_bytes: u64,
}

impl StorageStats {
    pub fn formatted_total(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

/// Human-readable size (`0 Bytes`, `1.5 KB`, `2 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["Bytes", "KB", "MB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Per-user key/value store
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Load a record, `None` when it was never saved
    async fn load(&self, user: &str, kind: StoreKind)
        -> Result<Option<serde_json::Value>, StoreError>;

    /// Replace a record
    async fn save(
        &self,
        user: &str,
        kind: StoreKind,
        value: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Remove every record of `user`
    async fn clear(&self, user: &str) -> Result<(), StoreError>;

    /// Storage footprint of `user`, `None` when nothing is stored
    async fn storage_stats(&self, user: &str) -> Result<Option<StorageStats>, StoreError>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, StoreKind), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(
        &self,
        user: &str,
        kind: StoreKind,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(&(user.to_string(), kind)).cloned())
    }

    async fn save(
        &self,
        user: &str,
        kind: StoreKind,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert((user.to_string(), kind), value.clone());
        Ok(())
    }

    async fn clear(&self, user: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|(owner, _), _| owner != user);
        Ok(())
    }

    async fn storage_stats(&self, user: &str) -> Result<Option<StorageStats>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = StorageStats::default();
        for ((owner, kind), value) in records.iter() {
            if owner == user {
                let size = serde_json::to_vec_pretty(value)?.len() as u64;
                stats.files.insert(format!("{}.json", kind), size);
                stats.total_bytes += size;
            }
        }
        Ok((!stats.files.is_empty()).then_some(stats))
    }
}
