//! Directory inventory.
//!
//! The cache directory is the only source of truth: every query rescans it.

use crate::cache::key::CacheKey;
use bridge_traits::storage::FileSystemAccess;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// One cached file as observed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Sum of entry sizes.
pub fn total_bytes(entries: &[CacheEntry]) -> u64 {
    entries.iter().map(|e| e.size_bytes).sum()
}

/// Enumerates cache entries in one directory.
#[derive(Clone)]
pub struct Inventory {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
}

impl Inventory {
    pub fn new(fs: Arc<dyn FileSystemAccess>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    /// Snapshot of all readable entries, in directory enumeration order.
    ///
    /// Directories, hidden files, and files whose size or modification time
    /// cannot be read are skipped. A missing or unreadable directory yields an
    /// empty list.
    pub async fn list(&self) -> Vec<CacheEntry> {
        let paths = match self.fs.list_directory(&self.root).await {
            Ok(paths) => paths,
            Err(e) if e.is_not_found() => {
                debug!(dir = ?self.root, "Cache directory does not exist yet");
                return Vec::new();
            }
            Err(e) => {
                warn!(dir = ?self.root, error = %e, "Failed to list cache directory");
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(entry) = self.read_entry(&path).await {
                entries.push(entry);
            }
        }

        entries
    }

    /// Total bytes currently cached.
    pub async fn total_size(&self) -> u64 {
        total_bytes(&self.list().await)
    }

    /// Read one file as a cache entry, if it qualifies.
    pub async fn entry_at(&self, path: &Path) -> Option<CacheEntry> {
        self.read_entry(path).await
    }

    async fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }

        let metadata = match self.fs.metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(file = name, error = %e, "Skipping unreadable cache entry");
                return None;
            }
        };

        if metadata.is_directory {
            return None;
        }

        let Some(last_modified) = metadata.modified_at else {
            debug!(file = name, "Skipping cache entry without modification time");
            return None;
        };

        Some(CacheEntry {
            key: CacheKey::from_file_name(name),
            local_path: path.to_path_buf(),
            size_bytes: metadata.size,
            last_modified,
        })
    }
}
