//! Streaming Engine Library
//!
//! This library turns raw conversation stream bytes into ordered message
//! snapshots: framing, event decoding, per-message merging, and fan-out to
//! subscribers, plus the live client and transcript replay drivers.

pub mod assemble;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod publish;
pub mod replay;
pub mod store;
pub mod toolcall;
