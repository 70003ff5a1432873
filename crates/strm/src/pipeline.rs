//! The per-connection pull loop.
//!
//! bytes → frames → events → merges → snapshots, one connection per loop.
//! The loop suspends once per transport chunk and checks cancellation
//! there, so teardown always happens at a frame boundary: no partially
//! applied event, no snapshot after cancel, buffered partial frame
//! dropped.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::assemble::{ApplyOutcome, Assembler};
use crate::decode::{self, DecodeOutcome};
use crate::error::StreamError;
use crate::frame::FrameBuffer;
use crate::publish::SnapshotHub;

/// Counters for one stream run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Complete frames extracted from the byte stream.
    pub frames: u64,
    /// Frames that decoded to a known event.
    pub events: u64,
    /// Frames dropped as undecodable.
    pub malformed: u64,
    /// Events refused because their message was already terminal.
    pub violations: u64,
    /// Snapshots published to subscribers.
    pub snapshots: u64,
    /// The run ended by cancellation rather than end of stream.
    pub cancelled: bool,
}

impl std::fmt::Display for StreamStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} events, {} malformed, {} violations, {} snapshots",
            self.frames, self.events, self.malformed, self.violations, self.snapshots
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Pump one byte stream dry.
///
/// Returns when the stream ends, the token fires, or a transport-class
/// error occurs. Messages merged before an error keep their last valid
/// state; nothing is rolled back.
pub(crate) async fn run_stream<S>(
    mut stream: S,
    assembler: &Assembler,
    hub: &SnapshotHub,
    token: &CancellationToken,
    max_pending_bytes: usize,
) -> Result<StreamStats, StreamError>
where
    S: Stream<Item = Result<Bytes, StreamError>> + Unpin,
{
    let mut framing = FrameBuffer::with_max_pending(max_pending_bytes);
    let mut stats = StreamStats::default();

    loop {
        let next = tokio::select! {
            // Cancellation wins over a ready chunk; teardown must not race.
            biased;
            _ = token.cancelled() => {
                if framing.pending() > 0 {
                    debug!(
                        "stream cancelled; dropping {} buffered bytes",
                        framing.pending()
                    );
                }
                stats.cancelled = true;
                return Ok(stats);
            }
            next = stream.next() => next,
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;

        for frame in framing.push(&chunk)? {
            stats.frames += 1;
            match decode::decode_frame(&frame) {
                DecodeOutcome::Event(event) => {
                    stats.events += 1;
                    match assembler.apply(event) {
                        ApplyOutcome::Publish(snapshot) => {
                            hub.publish(snapshot);
                            stats.snapshots += 1;
                        }
                        ApplyOutcome::Skip => {}
                        ApplyOutcome::Violation => stats.violations += 1,
                    }
                }
                DecodeOutcome::Ignored => {}
                DecodeOutcome::Malformed => stats.malformed += 1,
            }
        }
    }

    if let Some(tail) = framing.finish() {
        debug!(
            "discarding {} bytes of unterminated trailing frame",
            tail.len()
        );
    }
    Ok(stats)
}
