//! Error types for the stream engine.

use thiserror::Error;

/// Failures that terminate one stream.
///
/// Only transport-class problems appear here. Malformed frames, unknown
/// event types and correlation misses are recovered locally by the pipeline
/// and never escalate; already-assembled messages always keep their last
/// valid state when a stream errors out.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP-level failure (connect, read, bad status).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local I/O failure (replay transcript reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a non-success status.
    #[error("server rejected stream request: HTTP {status}")]
    Status { status: u16 },

    /// Bytes kept arriving without a frame delimiter. Indicates a stream
    /// that does not speak the framing protocol at all.
    #[error("frame buffer exceeded {limit} bytes without a frame delimiter")]
    FrameOverflow { limit: usize },

    /// The pipeline task died without producing a result.
    #[error("stream task failed: {0}")]
    Task(String),
}
