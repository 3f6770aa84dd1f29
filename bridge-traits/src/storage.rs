//! Storage and File System Abstractions
//!
//! Provides a platform-agnostic trait for the file operations the media cache
//! performs on its directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Dynamic async writer handed out by streaming writes.
pub type DynAsyncWrite = dyn tokio::io::AsyncWrite + Send + Unpin;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app cache directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn cache_size(fs: &dyn FileSystemAccess) -> Result<u64> {
///     let dir = fs.get_cache_directory().await?.join("media");
///     let mut total = 0;
///     for entry in fs.list_directory(&dir).await? {
///         total += fs.metadata(&entry).await?.size;
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// This directory is suitable for files that can be deleted by the
    /// system when storage is low.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Move a file within the same volume, replacing `to` if it exists
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Open a file for streaming writes, truncating any previous content
    async fn open_write_stream(&self, path: &Path) -> Result<Box<DynAsyncWrite>>;
}
