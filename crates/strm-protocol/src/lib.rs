//! Canonical protocol types for the strm conversation stream.
//!
//! This crate defines the wire events pushed by the agent backend and the
//! assembled message model consumed by the web frontend:
//!
//! ```text
//! Agent backend --[push stream: wire events]--> strm engine --[snapshots]--> Frontend
//! ```
//!
//! The frontend never sees raw wire events. The engine folds them into
//! [`messages::Message`] aggregates and publishes immutable snapshots; the
//! frontend renders whatever snapshot it last received.
//!
//! ## Design Principles
//!
//! 1. **Events are ephemeral, messages are the product.** An event is only
//!    meaningful relative to the message it mutates.
//! 2. **The wire is snake_case JSON, adjacently tagged.** Every event is
//!    `{"type": "...", "data": {...}}` with a shared envelope inside `data`.
//! 3. **Unknown event types are survivable.** They decode to
//!    [`events::Event::Unknown`] and are dropped, never errored.
//! 4. **TypeScript bindings are generated from these types** so the frontend
//!    and engine cannot drift apart.

pub mod events;
pub mod messages;

pub use events::{
    Event, EventEnvelope, InterruptEvent, MessageChunkEvent, ReferenceInformationEvent,
    ToolCallChunk, ToolCallDecl, ToolCallDeltaEvent, ToolCallResultEvent,
};
pub use messages::{
    FinishReason, KnowledgeBaseResult, Message, Role, ToolCall, WebSearchResult,
};
