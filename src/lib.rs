//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-cache`, `core-runtime`). Host applications can depend
//! on `media-cache-workspace` and enable `desktop-shims` to get the cache
//! manager wired with the desktop bridges, without listing each crate.

#[cfg(feature = "desktop-shims")]
pub use core_cache as cache;
#[cfg(feature = "desktop-shims")]
pub use core_runtime as runtime;
