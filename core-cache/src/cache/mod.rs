//! # Media Cache Module
//!
//! Disk-backed caching of large media assets.
//!
//! ## Overview
//!
//! The cache directory is the whole persisted state: one regular file per
//! asset, named by the [`KeyMapper`], plus a hidden `.staging` directory for
//! transfers that have not finished. There is no index file.
//!
//! Key features:
//! - Collision-free file names derived from the full identifier
//! - Size budget enforced oldest-first, maximum age enforced when within budget
//! - The entry being played is never evicted
//! - One transfer per identifier, streamed to the caller while it is cached
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     MediaCacheManager                  │
//! │  - resolve_for_playback()              │
//! │  - reconcile() / clear_all()           │
//! │  - set_size_limit_mb() / set_max_age() │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> KeyMapper (identifier → file name)
//!          ├──> Inventory (directory scan)
//!          ├──> EvictionEngine (deletes, emits events)
//!          └──> transfer (HttpClient → staging → rename)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_cache::{MediaCacheManager, PlayableContent};
//!
//! # async fn example(manager: &MediaCacheManager) -> core_cache::Result<()> {
//! match manager.resolve_for_playback("https://cdn.example.com/intro.mp4", true).await? {
//!     PlayableContent::Cached(file) => println!("play {:?}", file.path),
//!     PlayableContent::Streaming(stream) => { /* feed the player */ drop(stream) }
//!     PlayableContent::InFlight(watcher) => { watcher.wait().await?; }
//!     PlayableContent::Remote { url } => println!("play {}", url),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod eviction;
pub mod inventory;
pub mod key;
pub mod manager;
pub mod stats;
pub mod transfer;

// Re-export commonly used types
pub use config::CacheConfig;
pub use eviction::{ClearReport, EvictionEngine, EvictionFailure, EvictionPolicy, ReconcileReport};
pub use inventory::{CacheEntry, Inventory};
pub use key::{CacheKey, KeyMapper, STAGING_DIR_NAME};
pub use manager::{MediaCacheManager, PlayableContent};
pub use stats::CacheStats;
pub use transfer::{CachedFile, TransferStatus, TransferStream, TransferWatcher};
