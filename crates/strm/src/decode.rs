//! Frame payload decoding.
//!
//! A frame is a handful of text lines. Exactly one of them should carry the
//! `data:` prefix with a JSON event behind it; everything else is comment
//! or keepalive noise. Decoding is deliberately lenient: a corrupt payload
//! costs one frame and a log line, never the stream.

use log::{debug, warn};
use strm_protocol::Event;

/// Payload line marker. An optional single space may follow it.
const DATA_PREFIX: &str = "data:";

/// Most bytes of a payload worth quoting in a diagnostic.
const LOG_PAYLOAD_LIMIT: usize = 160;

/// What one frame decoded to.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A well-formed event the assembler should merge.
    Event(Event),
    /// Keepalive/comment frame or an unknown event type; nothing to do.
    Ignored,
    /// The payload would not parse. Dropped with a diagnostic.
    Malformed,
}

impl DecodeOutcome {
    pub fn into_event(self) -> Option<Event> {
        match self {
            DecodeOutcome::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Decode one frame.
pub fn decode_frame(frame: &str) -> DecodeOutcome {
    let Some(payload) = payload_line(frame) else {
        return DecodeOutcome::Ignored;
    };

    match serde_json::from_str::<Event>(payload) {
        Ok(Event::Unknown) => {
            debug!(
                "ignoring unknown stream event type: {}",
                clip(payload, LOG_PAYLOAD_LIMIT)
            );
            DecodeOutcome::Ignored
        }
        Ok(event) => DecodeOutcome::Event(event),
        Err(err) => {
            warn!(
                "dropping undecodable stream frame ({err}): {}",
                clip(payload, LOG_PAYLOAD_LIMIT)
            );
            DecodeOutcome::Malformed
        }
    }
}

/// Find the payload line of a frame, stripping the marker.
///
/// The first `data:` line wins; the protocol emits one per frame. Trailing
/// `\r` is tolerated for transports that insist on CRLF line endings.
fn payload_line(frame: &str) -> Option<&str> {
    for line in frame.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            return Some(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    None
}

/// Truncate on a character boundary for log output.
fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
