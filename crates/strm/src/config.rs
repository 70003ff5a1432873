//! Engine tuning knobs.
//!
//! All three option structs deserialize with full defaults so they can be
//! embedded in a TOML config file where every key is optional.

use serde::{Deserialize, Serialize};

use crate::frame::DEFAULT_MAX_PENDING_BYTES;

/// Pipeline and publication options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Max bytes buffered while waiting for a frame delimiter before the
    /// stream is declared broken.
    pub max_pending_bytes: usize,

    /// Snapshot broadcast channel capacity. Lagging subscribers lose oldest
    /// snapshots first and self-heal on the next merge.
    pub snapshot_buffer: usize,

    /// How many streams may be in flight at once; further `process` calls
    /// wait for a slot.
    pub max_concurrent_streams: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            snapshot_buffer: 256,
            max_concurrent_streams: 8,
        }
    }
}

/// Live connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Give up connecting after this many failed attempts.
    pub max_connect_attempts: u32,

    /// First retry delay; doubles per attempt with up to 20% jitter.
    pub base_backoff_ms: u64,

    /// Retry delay ceiling.
    pub max_backoff_ms: u64,

    /// TCP/TLS connect timeout.
    pub connect_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connect_attempts: 50,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Transcript replay options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Pause between replayed frames at speed 1.0.
    pub frame_delay_ms: u64,

    /// Initial speed multiplier; can be changed mid-replay through the
    /// pacing channel.
    pub speed: f64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            frame_delay_ms: 25,
            speed: 1.0,
        }
    }
}
