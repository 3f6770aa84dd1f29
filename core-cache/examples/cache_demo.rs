//! Media cache demonstration
//!
//! Resolves one remote asset through the cache with the desktop bridges,
//! printing every cache event as it is emitted.
//!
//! Run with:
//! ```bash
//! # First run streams and caches the asset, second run is a cache hit
//! cargo run -p core-cache --features desktop-shims --example cache_demo -- https://example.com/video.mp4
//!
//! # JSON logs
//! cargo run -p core-cache --features desktop-shims --example cache_demo -- https://example.com/video.mp4 json
//! ```

use bridge_traits::time::LogLevel;
use core_cache::{MediaCacheManager, PlayableContent};
use core_runtime::config::CoreConfig;
use core_runtime::events::CacheEvent;
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};
use futures::StreamExt;
use std::env;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let identifier = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "https://www.w3schools.com/html/mov_bbb.mp4".to_string());

    let format = match args.get(2).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };

    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(LogLevel::Debug)
            .with_url_redaction(true),
    )?;

    let cache_dir = env::temp_dir().join("media-cache-demo");
    let core = CoreConfig::builder()
        .cache_dir(&cache_dir)
        .cache_size_mb(200)
        .max_cache_age_days(7)
        .build()?;

    let manager = MediaCacheManager::from_core_config(&core)?;
    manager.register_observer(Arc::new(|event: &CacheEvent| {
        println!(
            "[event] {} {}",
            event.name(),
            serde_json::Value::Object(event.properties())
        );
    }));

    manager.initialize().await?;
    info!(dir = ?cache_dir, "Cache ready");

    match manager.resolve_for_playback(&identifier, true).await? {
        PlayableContent::Cached(file) => {
            let path = file.path.to_string_lossy().into_owned();
            println!("Playing {} from cache ({} bytes)", strip_path(&path), file.size_bytes);
            manager.release_active(&identifier);
        }
        PlayableContent::Streaming(mut stream) => {
            let watcher = stream.watcher();
            let mut received = 0usize;
            while let Some(chunk) = stream.next().await {
                received += chunk?.len();
            }
            println!("Streamed {} bytes", received);

            let file = watcher.wait().await?;
            let path = file.path.to_string_lossy().into_owned();
            println!("Cached as {}", strip_path(&path));
        }
        PlayableContent::InFlight(watcher) => {
            let file = watcher.wait().await?;
            println!("Joined transfer; cached at {:?}", file.path);
        }
        PlayableContent::Remote { url } => println!("Playing remote {}", url),
    }

    let stats = manager.cache_stats().await;
    println!(
        "Cache: {} entries, {:.1}% of {} MB",
        stats.entry_count,
        stats.usage_percentage(),
        manager.size_limit_mb()
    );

    Ok(())
}
