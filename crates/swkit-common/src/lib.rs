//! # swkit Common
//!
//! Logging configuration and small shared helpers for the swkit offline
//! caching worker.

use chrono::{DateTime, Utc};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch for the given instant.
pub fn unix_millis(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

/// Milliseconds since the Unix epoch, now.
pub fn now_millis() -> u64 {
    unix_millis(Utc::now())
}
