//! # Media Cache Core
//!
//! Disk-backed cache manager for large downloadable media assets.
//!
//! ## Overview
//!
//! This crate handles:
//! - Mapping remote identifiers to local cache files
//! - Enforcing a size budget and a maximum entry age
//! - Protecting the entry currently being played from eviction
//! - Streaming transfers that populate the cache as they are consumed
//! - Reporting cache activity to a single observer
//!
//! Host capabilities (HTTP, file system, clock) come from `bridge-traits`;
//! see [`MediaCacheManager::from_core_config`].

pub mod cache;
pub mod error;

pub use cache::{
    CacheConfig, CacheEntry, CacheKey, CacheStats, CachedFile, ClearReport, EvictionEngine,
    EvictionPolicy, Inventory, KeyMapper, MediaCacheManager, PlayableContent, ReconcileReport,
    TransferStatus, TransferStream, TransferWatcher,
};
pub use error::{CacheError, Result};
