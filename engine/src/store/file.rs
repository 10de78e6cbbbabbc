//! JSON file store
//!
//! Layout: `<data_dir>/users/<encoded user id>/<kind>.json`. ASCII letters
//! and digits of the user id are kept and every other byte becomes `_xx`
//! (lowercase hex), so distinct ids always get distinct directories. The
//! empty id maps to `_`.
//! Records are written to a temporary file first and renamed into place.

use super::{DurableStore, StorageStats, StoreError, StoreKind};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::telemetry::short_id;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `<data_dir>/users`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("users"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user_dir(&self, user: &str) -> PathBuf {
        self.root.join(encode_user(user))
    }

    fn record_path(&self, user: &str, kind: StoreKind) -> PathBuf {
        self.user_dir(user).join(format!("{}.json", kind))
    }
}

fn encode_user(user: &str) -> String {
    if user.is_empty() {
        return "_".to_string();
    }

    let mut encoded = String::with_capacity(user.len());
    for byte in user.bytes() {
        if byte.is_ascii_alphanumeric() {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load(
        &self,
        user: &str,
        kind: StoreKind,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.record_path(user, kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        user: &str,
        kind: StoreKind,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let dir = self.user_dir(user);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.record_path(user, kind);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved {} for {}", kind, short_id(user));
        Ok(())
    }

    async fn clear(&self, user: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(self.user_dir(user)).await {
            Ok(()) => {
                debug!("Cleared data for {}", short_id(user));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn storage_stats(&self, user: &str) -> Result<Option<StorageStats>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.user_dir(user)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut stats = StorageStats::default();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            stats.total_bytes += meta.len();
            stats.files.insert(name, meta.len());
        }

        Ok(Some(stats))
    }
}
