//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{DynAsyncWrite, FileMetadata, FileSystemAccess},
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Provides async file I/O operations using:
/// - `tokio::fs` for async operations
/// - Platform-specific app cache directory via `dirs`
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the platform cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("media-cache-core");

        Self { cache_dir }
    }

    /// Create a new file system accessor rooted at a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }
        Ok(self.cache_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Renamed file");
        Ok(())
    }

    async fn open_write_stream(&self, path: &Path) -> Result<Box<DynAsyncWrite>> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        let file = fs::File::create(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Opened file for writing");
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_custom_cache_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("nested").join("cache");
        let fs = TokioFileSystem::with_cache_directory(cache.clone());

        let cache_dir = fs.get_cache_directory().await.unwrap();
        assert_eq!(cache_dir, cache);
        assert!(cache.is_dir());
    }

    #[tokio::test]
    async fn test_write_stream_metadata_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_cache_directory(tmp.path().to_path_buf());
        let file = tmp.path().join("sub").join("clip.mp4");

        let mut writer = fs.open_write_stream(&file).await.unwrap();
        writer.write_all(b"Hello, World!").await.unwrap();
        writer.shutdown().await.unwrap();

        let meta = fs.metadata(&file).await.unwrap();
        assert_eq!(meta.size, 13);
        assert!(!meta.is_directory);
        assert!(meta.modified_at.is_some());

        fs.delete_file(&file).await.unwrap();
        assert!(!fs.exists(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_and_list() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_cache_directory(tmp.path().to_path_buf());
        let from = tmp.path().join("a.part");
        let to = tmp.path().join("a.mp4");
        std::fs::write(&from, b"data").unwrap();

        fs.rename(&from, &to).await.unwrap();

        let listed = fs.list_directory(tmp.path()).await.unwrap();
        assert_eq!(listed, vec![to]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_cache_directory(tmp.path().to_path_buf());

        let err = fs
            .list_directory(&tmp.path().join("absent"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
