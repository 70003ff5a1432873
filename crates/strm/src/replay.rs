//! Transcript replay.
//!
//! Replays a captured stream through the same pipeline as a live
//! connection, pacing emission so a human can watch the UI rebuild. Pacing
//! is the only thing replay controls; merge semantics cannot drift because
//! the replayed frames literally are the captured bytes.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use log::debug;
use tokio::sync::watch;

use crate::config::ReplayOptions;
use crate::error::StreamError;
use crate::frame::FrameBuffer;

/// Pacing control, adjustable mid-replay through a watch channel.
///
/// Changing the value takes effect from the next frame on.
#[derive(Debug, Clone, Copy)]
pub struct ReplayPacing {
    /// Speed multiplier over the configured frame delay. Values at or
    /// below zero behave like fast-forward.
    pub speed: f64,
    /// Skip inter-frame delays entirely.
    pub fast_forward: bool,
}

impl Default for ReplayPacing {
    fn default() -> Self {
        Self {
            speed: 1.0,
            fast_forward: false,
        }
    }
}

impl ReplayPacing {
    fn delay(&self, base_ms: u64) -> Option<Duration> {
        if self.fast_forward || base_ms == 0 || self.speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(base_ms as f64 / 1000.0 / self.speed))
    }
}

/// Split a captured transcript into frames and stream them back with
/// pacing, delimiters restored.
///
/// Framing happens eagerly so an unterminated tail is discarded here, the
/// same way live end-of-stream would discard it.
pub fn paced_stream(
    transcript: &str,
    options: &ReplayOptions,
    pacing: watch::Receiver<ReplayPacing>,
) -> Result<BoxStream<'static, Result<Bytes, StreamError>>, StreamError> {
    let mut framing = FrameBuffer::with_max_pending(usize::MAX);
    let frames: VecDeque<String> = framing.push(transcript.as_bytes())?.into();
    if let Some(tail) = framing.finish() {
        debug!(
            "replay transcript ends mid-frame; discarding {} bytes",
            tail.len()
        );
    }

    let base_ms = options.frame_delay_ms;
    let stream = stream::unfold((frames, pacing), move |(mut frames, pacing)| async move {
        let frame = frames.pop_front()?;
        let current = *pacing.borrow();
        if let Some(delay) = current.delay(base_ms) {
            tokio::time::sleep(delay).await;
        }
        let mut bytes = frame.into_bytes();
        bytes.extend_from_slice(b"\n\n");
        Some((Ok(Bytes::from(bytes)), (frames, pacing)))
    });
    Ok(stream.boxed())
}

/// A watch channel carrying the initial pacing derived from options.
pub fn pacing_channel(
    options: &ReplayOptions,
) -> (watch::Sender<ReplayPacing>, watch::Receiver<ReplayPacing>) {
    watch::channel(ReplayPacing {
        speed: options.speed,
        fast_forward: false,
    })
}
