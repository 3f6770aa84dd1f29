//! Identifier to file name mapping.
//!
//! The file name is derived from the whole identifier so two assets that share
//! a trailing path segment (`/a/clip.mp4`, `/b/clip.mp4`) never collide:
//!
//! ```text
//! <sha256 hex of identifier>_<host and path, separators replaced by '_'>
//! ```
//!
//! The readable suffix is only a convenience for humans browsing the cache
//! directory; uniqueness comes from the hash prefix.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Longest readable suffix kept after the hash. Truncation drops the front so
/// the file extension survives.
const MAX_SUFFIX_LEN: usize = 120;

/// Name of the hidden directory holding in-progress transfers.
pub const STAGING_DIR_NAME: &str = ".staging";

/// File name of a cache entry inside the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidIdentifier`] if `identifier` is not an
    /// absolute URL.
    pub fn for_identifier(identifier: &str) -> Result<Self> {
        let url = Url::parse(identifier)
            .map_err(|e| CacheError::InvalidIdentifier(format!("{}: {}", identifier, e)))?;

        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        let suffix = readable_suffix(&url);
        if suffix.is_empty() {
            Ok(Self(digest))
        } else {
            Ok(Self(format!("{}_{}", digest, suffix)))
        }
    }

    /// Wrap a file name found in the cache directory.
    pub fn from_file_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn readable_suffix(url: &Url) -> String {
    let raw = format!("{}{}", url.host_str().unwrap_or_default(), url.path());

    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('_');

    // Sanitized text is ASCII, so byte offsets are char boundaries.
    let start = trimmed.len().saturating_sub(MAX_SUFFIX_LEN);
    trimmed[start..].trim_start_matches('_').to_string()
}

/// Resolves identifiers to paths inside one cache directory.
#[derive(Debug, Clone)]
pub struct KeyMapper {
    root: PathBuf,
}

impl KeyMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache directory this mapper resolves into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_for(&self, identifier: &str) -> Result<CacheKey> {
        CacheKey::for_identifier(identifier)
    }

    /// Local path the identifier is cached at.
    pub fn path(&self, identifier: &str) -> Result<PathBuf> {
        Ok(self.path_for_key(&self.key_for(identifier)?))
    }

    pub fn path_for_key(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Directory for in-progress transfers. Hidden, so inventory skips it.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// Unique staging file for one transfer attempt.
    pub fn staging_path(&self, key: &CacheKey) -> PathBuf {
        self.staging_dir()
            .join(format!("{}.{}.part", key.as_str(), uuid::Uuid::new_v4()))
    }
}
