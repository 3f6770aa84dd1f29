//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media cache core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Cache event types and the event sink
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the cache crate depends on.
//! It establishes the bridge wiring, logging conventions, and the
//! notification channel used to report cache activity to a host observer.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
