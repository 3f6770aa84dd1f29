//! Cache configuration

use core_runtime::config::CoreConfig;
use std::path::PathBuf;
use std::time::Duration;

const BYTES_PER_MB: u64 = 1024 * 1024;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for the media cache manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum cache size in bytes (default: 500 MB)
    pub max_cache_size_bytes: u64,

    /// Entries older than this are removed when the cache is within budget
    /// (default: 30 days)
    pub max_age: Duration,

    /// Directory holding cached files
    pub cache_directory: PathBuf,

    /// Abort a transfer when the source delivers nothing for this long
    /// (default: 30s)
    pub stall_timeout: Duration,

    /// Number of chunks buffered between the transfer task and the caller
    /// (default: 32)
    pub stream_buffer_chunks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 500 * BYTES_PER_MB,
            max_age: Duration::from_secs(30 * SECONDS_PER_DAY),
            cache_directory: std::env::temp_dir().join("media-cache"),
            stall_timeout: Duration::from_secs(30),
            stream_buffer_chunks: 32,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    /// Set maximum entry age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set cache directory.
    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    /// Set the per-read stall timeout for transfers.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the number of chunks buffered for the streaming caller.
    pub fn with_stream_buffer_chunks(mut self, chunks: usize) -> Self {
        self.stream_buffer_chunks = chunks;
        self
    }

    /// Size limit in whole megabytes.
    pub fn max_cache_size_mb(&self) -> u64 {
        self.max_cache_size_bytes / BYTES_PER_MB
    }

    /// Maximum age in whole days, as reported in events.
    pub fn max_age_days(&self) -> u32 {
        u32::try_from(self.max_age.as_secs() / SECONDS_PER_DAY).unwrap_or(u32::MAX)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if self.max_age.is_zero() {
            return Err("max_age must be greater than 0".to_string());
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        if self.stall_timeout.is_zero() {
            return Err("stall_timeout must be greater than 0".to_string());
        }

        if self.stream_buffer_chunks == 0 {
            return Err("stream_buffer_chunks must be at least 1".to_string());
        }

        Ok(())
    }
}

impl From<&CoreConfig> for CacheConfig {
    fn from(core: &CoreConfig) -> Self {
        Self::default()
            .with_cache_directory(core.cache_dir.clone())
            .with_max_size(core.cache_size_mb.saturating_mul(BYTES_PER_MB))
            .with_max_age(Duration::from_secs(
                u64::from(core.max_cache_age_days) * SECONDS_PER_DAY,
            ))
    }
}

/// Convert a megabyte count to bytes, rejecting overflow.
pub(crate) fn mb_to_bytes(mb: u64) -> Option<u64> {
    mb.checked_mul(BYTES_PER_MB)
}

/// Convert a day count to a duration.
pub(crate) fn days_to_duration(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * SECONDS_PER_DAY)
}
