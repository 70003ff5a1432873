//! Wire-level stream events.
//!
//! Every frame on the push stream carries one adjacently tagged JSON event:
//!
//! ```text
//! data: {"type":"message_chunk","data":{"id":"m1","thread_id":"t1",...}}
//! ```
//!
//! The `data` object always contains the common [`EventEnvelope`] fields
//! plus whatever the variant adds. One physical connection interleaves
//! events for many messages and tasks; consumers must key on the envelope
//! `id`, never on arrival order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::messages::{FinishReason, KnowledgeBaseResult, Role, WebSearchResult};

/// Fields carried by every event, inside the variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct EventEnvelope {
    /// Message id this event applies to.
    pub id: String,

    /// Conversation the message belongs to.
    #[serde(default)]
    pub thread_id: String,

    /// Backend turn that produced the event. Side-channel events correlate
    /// by this key alone.
    #[serde(default)]
    pub task_id: String,

    /// Producing agent.
    #[serde(default)]
    pub agent: String,

    /// Author role of the target message.
    pub role: Role,

    /// When present, the target message finalizes after this event merges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// The discriminated union of everything the backend pushes.
///
/// Unrecognized `type` tags decode to [`Event::Unknown`] so newer backends
/// never break older consumers; the engine drops them with a diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/")]
pub enum Event {
    /// Incremental text and/or reasoning delta, optionally carrying a fresh
    /// evidence snapshot.
    MessageChunk(MessageChunkEvent),

    /// Authoritative tool-call declarations, possibly with argument chunks.
    ToolCalls(ToolCallDeltaEvent),

    /// Argument chunks, possibly with tool-call declarations. Same payload
    /// shape as `tool_calls`; the backend uses both tags interchangeably
    /// while arguments stream.
    ToolCallChunks(ToolCallDeltaEvent),

    /// Execution result for one previously declared tool call.
    ToolCallResult(ToolCallResultEvent),

    /// The backend paused for user input, offering choices.
    Interrupt(InterruptEvent),

    /// Asynchronous evidence delivery, correlated by `task_id` only.
    ReferenceInformation(ReferenceInformationEvent),

    /// Any tag this build does not know.
    #[serde(other)]
    #[ts(skip)]
    Unknown,
}

impl Event {
    /// Common envelope, absent only on [`Event::Unknown`].
    pub fn envelope(&self) -> Option<&EventEnvelope> {
        match self {
            Event::MessageChunk(ev) => Some(&ev.envelope),
            Event::ToolCalls(ev) | Event::ToolCallChunks(ev) => Some(&ev.envelope),
            Event::ToolCallResult(ev) => Some(&ev.envelope),
            Event::Interrupt(ev) => Some(&ev.envelope),
            Event::ReferenceInformation(ev) => Some(&ev.envelope),
            Event::Unknown => None,
        }
    }

    /// Wire tag, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MessageChunk(_) => "message_chunk",
            Event::ToolCalls(_) => "tool_calls",
            Event::ToolCallChunks(_) => "tool_call_chunks",
            Event::ToolCallResult(_) => "tool_call_result",
            Event::Interrupt(_) => "interrupt",
            Event::ReferenceInformation(_) => "reference_information",
            Event::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Variant payloads
// ============================================================================

/// Payload of `message_chunk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct MessageChunkEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,

    /// Text delta to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning delta to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Full replacement evidence set, not an increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_results: Option<Vec<KnowledgeBaseResult>>,

    /// Full replacement evidence set, not an increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_results: Option<Vec<WebSearchResult>>,
}

/// Payload shared by `tool_calls` and `tool_call_chunks`.
///
/// Declarations and chunks may ride on either tag; both lists default to
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ToolCallDeltaEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,

    /// Declared calls. A non-empty name on the first entry marks the list
    /// as authoritative: it replaces whatever the message held before.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDecl>,

    /// Raw argument fragments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

/// One declared tool call inside a `tool_calls` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ToolCallDecl {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Pre-parsed arguments, when the backend sends them whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// One raw argument fragment.
///
/// With an `id` the fragment is self-contained: it carries the complete
/// argument text the target call has produced so far. Without an `id` it is
/// a continuation of whichever call is currently mid-stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ToolCallChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Raw argument text, an arbitrary slice of a JSON document.
    #[serde(default)]
    pub args: String,
}

/// Payload of `tool_call_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ToolCallResultEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,

    /// Which call the result answers.
    pub tool_call_id: String,

    /// Backend-defined result payload.
    #[serde(default)]
    pub result: Value,
}

/// Payload of `interrupt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct InterruptEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,

    /// Author-offered choices for the user.
    #[serde(default)]
    pub options: Vec<Value>,
}

/// Payload of `reference_information`.
///
/// Arrives asynchronously, possibly after the target message closed. `None`
/// leaves the corresponding message field untouched; `Some` overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ReferenceInformationEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_results: Option<Vec<KnowledgeBaseResult>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_results: Option<Vec<WebSearchResult>>,
}
