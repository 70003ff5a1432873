//! Assembled conversation messages.
//!
//! A message is built up incrementally by the engine from many small wire
//! events and rendered by the frontend after every merge. Until a finish
//! reason arrives the message is mutable; afterwards it is terminal and
//! never changes again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// One conversation turn, assembled from stream events sharing an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct Message {
    /// Unique per message; every wire event carries the id it applies to.
    pub id: String,

    /// Groups the messages of one conversation.
    pub thread_id: String,

    /// Groups the events of one backend turn. Side-channel events correlate
    /// by this key alone, so it doubles as a store index.
    pub task_id: String,

    /// Producing agent, as reported by the backend.
    #[serde(default)]
    pub agent: String,

    /// Message author role.
    pub role: Role,

    /// Accumulated text. Monotonically appended, never rewritten.
    #[serde(default)]
    pub content: String,

    /// Raw content deltas in receipt order, kept for replay and debugging.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_chunks: Vec<String>,

    /// Accumulated "thinking" text, independent of `content`.
    #[serde(default)]
    pub reasoning_content: String,

    /// Raw reasoning deltas in receipt order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_content_chunks: Vec<String>,

    /// Tool invocations proposed by this message, unique by id, in
    /// declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Knowledge base evidence attached to this message. Overwritten as a
    /// whole whenever the backend sends a fresh set; entries are unique by
    /// `file_id` (first occurrence wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_results: Option<Vec<KnowledgeBaseResult>>,

    /// Web search evidence attached to this message. Overwritten as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_results: Option<Vec<WebSearchResult>>,

    /// Why the message stopped. `Some` means terminal: no later event may
    /// mutate this message again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// True from creation until a finish reason or interrupt arrives. The
    /// frontend keys progress affordances off this flag.
    pub is_streaming: bool,

    /// Choices offered to the user; present only on interrupted messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,

    /// Unix milliseconds at assembly time.
    pub created_at: i64,
}

impl Message {
    /// Open a fresh streaming message.
    pub fn new(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        task_id: impl Into<String>,
        agent: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            task_id: task_id.into(),
            agent: agent.into(),
            role,
            content: String::new(),
            content_chunks: Vec::new(),
            reasoning_content: String::new(),
            reasoning_content_chunks: Vec::new(),
            tool_calls: Vec::new(),
            knowledge_base_results: None,
            web_search_results: None,
            finish_reason: None,
            is_streaming: true,
            options: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// A terminal message accepts no further mutation through the event path.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Append a content delta, recording the raw chunk.
    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
        self.content_chunks.push(delta.to_string());
    }

    /// Append a reasoning delta, recording the raw chunk.
    pub fn append_reasoning(&mut self, delta: &str) {
        self.reasoning_content.push_str(delta);
        self.reasoning_content_chunks.push(delta.to_string());
    }

    /// Find a tool call by id.
    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|c| c.id == id)
    }
}

// ============================================================================
// Message metadata types
// ============================================================================

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Why a message stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,
    /// The message ended by proposing tool calls.
    ToolCalls,
    /// The backend paused for user input.
    Interrupt,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::ToolCalls => write!(f, "tool_calls"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

// ============================================================================
// Tool calls
// ============================================================================

/// One function/tool invocation proposed by the assistant.
///
/// Arguments may arrive fragmented across many events. Until the enclosing
/// message finalizes, `args_chunks` is the source of truth in receipt order;
/// `args` materializes only when the chunks are joined and parsed at
/// finalization. Parsing fragments early is never valid, each one is an
/// arbitrary slice of a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ToolCall {
    /// Stable identifier. Chunks without an id attach to the most recently
    /// active call instead.
    pub id: String,

    /// Tool name. May stream in alongside the first argument fragment.
    #[serde(default)]
    pub name: String,

    /// Final parsed arguments. Set at message finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Raw argument fragments pending assembly, in receipt order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args_chunks: Vec<String>,

    /// Result of executing the call, set once by a result event. Also holds
    /// a structured error marker when the argument fragments fail to parse
    /// at finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: None,
            args_chunks: Vec::new(),
            result: None,
        }
    }

    /// Whether argument fragments are still awaiting assembly.
    pub fn has_pending_args(&self) -> bool {
        !self.args_chunks.is_empty()
    }
}

// ============================================================================
// Side-channel evidence
// ============================================================================

/// One knowledge base hit attached to a message.
///
/// Unknown backend fields are dropped on decode; the frontend only renders
/// what is listed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct KnowledgeBaseResult {
    /// Stable de-duplication key across evidence snapshots.
    pub file_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Matched passage text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Retrieval score, backend-defined scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One web search hit attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct WebSearchResult {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Snippet or extracted page text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
