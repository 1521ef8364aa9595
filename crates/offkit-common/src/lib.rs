//! # Offkit Common
//!
//! Shared plumbing for the offkit crates.
//!
//! ## Features
//!
//! - Logging configuration and setup on top of `tracing-subscriber`
//! - A wall-clock helper used to stamp cache snapshots

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
///
/// Returns 0 when the system clock reads earlier than the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
