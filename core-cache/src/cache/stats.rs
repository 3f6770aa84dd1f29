//! Cache statistics and monitoring

use crate::cache::key::CacheKey;
use serde::{Deserialize, Serialize};

/// Point-in-time statistics about the media cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached files
    pub entry_count: usize,

    /// Total bytes used by cached files
    pub total_bytes: u64,

    /// Configured size limit in bytes
    pub limit_bytes: u64,

    /// Configured maximum age in days
    pub max_age_days: u32,

    /// Entry currently protected from eviction
    pub active_key: Option<CacheKey>,

    /// Number of transfers still writing to staging
    pub in_flight_transfers: usize,

    /// Timestamp when stats were calculated
    pub calculated_at: i64,
}

impl CacheStats {
    /// Calculate cache usage as a percentage of the limit.
    pub fn usage_percentage(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.limit_bytes as f64) * 100.0
    }

    /// Returns true if the cache is above its limit.
    pub fn is_over_limit(&self) -> bool {
        self.total_bytes > self.limit_bytes
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.total_bytes >= self.limit_bytes
    }

    /// Bytes that must be freed to fit the limit.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.limit_bytes)
    }

    /// Returns average bytes per entry.
    pub fn average_entry_size(&self) -> u64 {
        if self.entry_count == 0 {
            0
        } else {
            self.total_bytes / self.entry_count as u64
        }
    }
}
