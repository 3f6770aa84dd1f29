//! # Cache Events
//!
//! Typed notifications describing cache activity, and the sink that delivers
//! them to a single host observer.
//!
//! ## Overview
//!
//! The event system consists of:
//! - **`CacheEvent`**: one variant per notification, serialized with an
//!   `event` tag carrying the wire name (`cache-success`, `cache-cleared`, ...)
//! - **`EventSink`**: holds at most one observer; events emitted while no
//!   observer is registered are dropped, never buffered
//! - **`EventObserver`**: the host-facing callback trait
//! - **`ChannelObserver`**: adapter forwarding into a bounded
//!   `tokio::sync::mpsc` channel without ever blocking the emitter
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐    emit     ┌───────────┐   on_event   ┌──────────┐
//! │ Fetch coordinator├────────────>│           ├─────────────>│ Observer │
//! └──────────────────┘             │ EventSink │              └──────────┘
//! ┌──────────────────┐    emit     │           │
//! │ Eviction engine  ├────────────>│           │
//! └──────────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, ChannelObserver, EventSink};
//! use std::sync::Arc;
//!
//! let sink = EventSink::new();
//! let (observer, mut rx) = ChannelObserver::new(16);
//! sink.register_observer(Arc::new(observer));
//!
//! sink.emit(CacheEvent::CachingDisabled {
//!     url: "https://cdn.example.com/a.mp4".to_string(),
//! });
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.name(), "caching-disabled");
//! ```
//!
//! ## Thread Safety
//!
//! `EventSink` is `Send + Sync` and is shared behind an `Arc`. The observer is
//! cloned out of the lock before it is invoked, so an observer may call back
//! into the sink (for example to unregister itself) without deadlocking.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capacity for [`ChannelObserver`] channels.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Format used for the `cached_timestamp` property.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Converts a byte count to megabytes rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_MB) * 100.0).round() / 100.0
}

/// Formats an instant for event payloads (`yyyy-MM-dd HH:mm:ss`, UTC).
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

// ============================================================================
// Event Types
// ============================================================================

/// Notification emitted by the cache.
///
/// Sizes are megabytes rounded to two decimals (see [`bytes_to_mb`]). The
/// serialized form carries the event name under the `event` key and every
/// payload field as a flat property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CacheEvent {
    /// Playback requested with caching turned off
    CachingDisabled { url: String },

    /// A transfer into the cache has started
    CachingInitiated {
        url: String,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },

    /// A transfer completed and the entry is now on disk
    CacheSuccess {
        url: String,
        file_size_mb: f64,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
        cached_timestamp: String,
    },

    /// A transfer failed or was cancelled; nothing was cached
    CacheFailure {
        url: String,
        error_message: String,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },

    /// A reconciliation pass found the cache over budget
    CacheLimitExceeded {
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },

    /// One entry was evicted
    CacheCleared {
        url: String,
        file_size_mb: f64,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
        max_cache_age_days: u32,
        is_old_cache: bool,
        cached_timestamp: String,
    },

    /// `clear_all` finished
    AllCacheCleared {
        entries_cleared: usize,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },

    /// A cache operation on a single entry failed or was skipped
    CacheOperationFailure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        error_message: String,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },

    /// Playback was served from a cached file
    VideoPlaybackFromCache {
        url: String,
        file_size_mb: f64,
        total_cache_size_mb: f64,
        cache_limit_mb: f64,
    },
}

impl CacheEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::CachingDisabled { .. } => "caching-disabled",
            CacheEvent::CachingInitiated { .. } => "caching-initiated",
            CacheEvent::CacheSuccess { .. } => "cache-success",
            CacheEvent::CacheFailure { .. } => "cache-failure",
            CacheEvent::CacheLimitExceeded { .. } => "cache-limit-exceeded",
            CacheEvent::CacheCleared { .. } => "cache-cleared",
            CacheEvent::AllCacheCleared { .. } => "all-cache-cleared",
            CacheEvent::CacheOperationFailure { .. } => "cache-operation-failure",
            CacheEvent::VideoPlaybackFromCache { .. } => "video-playback-from-cache",
        }
    }

    /// Event payload as a flat property map (the `event` tag excluded).
    pub fn properties(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("event");
                map
            }
            _ => Map::new(),
        }
    }

    /// Returns the severity level of this event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CacheEvent::CacheFailure { .. } | CacheEvent::CacheOperationFailure { .. } => {
                EventSeverity::Error
            }
            CacheEvent::CacheLimitExceeded { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

// ============================================================================
// Observer
// ============================================================================

/// Receives cache events.
///
/// Called synchronously on the emitting task; implementations must return
/// quickly and must not block.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event)
    }
}

/// Observer that forwards events into a bounded channel.
///
/// Uses `try_send`: when the receiver is full or gone, the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::Sender<CacheEvent>,
}

impl ChannelObserver {
    /// Creates the observer together with its receiving half.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CacheEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, event: &CacheEvent) {
        if let Err(err) = self.sender.try_send(event.clone()) {
            tracing::trace!(event = event.name(), error = %err, "Dropping cache event");
        }
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Single-observer notification sink.
///
/// The last registered observer wins. With no observer registered, emitted
/// events are discarded.
#[derive(Default)]
pub struct EventSink {
    observer: RwLock<Option<Arc<dyn EventObserver>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an event to the current observer, if any.
    pub fn emit(&self, event: CacheEvent) {
        let observer = self.observer.read().clone();

        match observer {
            Some(observer) => {
                tracing::debug!(event = event.name(), "Emitting cache event");
                observer.on_event(&event);
            }
            None => {
                tracing::trace!(event = event.name(), "No observer registered; event dropped");
            }
        }
    }

    /// Installs `observer`, returning the one it replaces.
    pub fn register_observer(
        &self,
        observer: Arc<dyn EventObserver>,
    ) -> Option<Arc<dyn EventObserver>> {
        self.observer.write().replace(observer)
    }

    /// Removes the current observer, returning it.
    pub fn unregister_observer(&self) -> Option<Arc<dyn EventObserver>> {
        self.observer.write().take()
    }

    pub fn has_observer(&self) -> bool {
        self.observer.read().is_some()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("has_observer", &self.has_observer())
            .finish()
    }
}
