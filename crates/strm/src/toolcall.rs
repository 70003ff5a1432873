//! Tool-call argument reconstruction.
//!
//! Argument text streams in as raw fragments, each an arbitrary slice of a
//! JSON document. Correlation is two-tier: a fragment with an id belongs to
//! exactly that call and carries the call's complete argument text so far
//! (set, not append); a fragment without an id continues whichever call is
//! currently mid-stream (append). Fragments are never parsed eagerly, only
//! joined and parsed once the enclosing message finalizes.

use log::{debug, warn};
use serde_json::{Value, json};
use strm_protocol::{ToolCall, ToolCallChunk, ToolCallDecl};

/// Replace a message's tool-call list with freshly declared calls.
pub(crate) fn declare_calls(calls: &mut Vec<ToolCall>, decls: &[ToolCallDecl]) {
    *calls = decls
        .iter()
        .map(|decl| {
            let mut call = ToolCall::new(decl.id.clone(), decl.name.clone());
            call.args = decl.args.clone();
            call
        })
        .collect();
}

/// Fold one raw argument fragment into the call list.
pub(crate) fn apply_chunk(calls: &mut Vec<ToolCall>, chunk: &ToolCallChunk) {
    match chunk.id.as_deref() {
        Some(id) => {
            if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                // Id-bearing fragments are self-contained: whatever was
                // pending is superseded, not extended.
                call.args_chunks = vec![chunk.args.clone()];
                if let Some(name) = chunk.name.as_deref()
                    && !name.is_empty()
                {
                    call.name = name.to_string();
                }
            } else {
                // First sight of this call id; the fragment doubles as its
                // declaration.
                let mut call = ToolCall::new(id, chunk.name.clone().unwrap_or_default());
                call.args_chunks = vec![chunk.args.clone()];
                calls.push(call);
            }
        }
        None => {
            let pending = calls.iter().filter(|c| c.has_pending_args()).count();
            if pending > 1 {
                debug!("{pending} tool calls mid-stream; anonymous fragment goes to the latest");
            }
            match calls.iter_mut().rev().find(|c| c.has_pending_args()) {
                Some(call) => call.args_chunks.push(chunk.args.clone()),
                None => debug!("dropping anonymous tool-call fragment with no call mid-stream"),
            }
        }
    }
}

/// Assemble final arguments at message finalization.
///
/// Joins the pending fragments and parses the result. A parse failure marks
/// the call with a structured error result, because a call whose arguments
/// cannot be parsed can never be executed; the enclosing message still
/// finalizes normally either way.
pub(crate) fn finalize_args(call: &mut ToolCall) {
    if call.args_chunks.is_empty() {
        return;
    }
    let joined = call.args_chunks.concat();
    match serde_json::from_str::<Value>(&joined) {
        Ok(args) => call.args = Some(args),
        Err(err) => {
            warn!(
                "tool call {} ({}) arguments failed to parse: {err}",
                call.id, call.name
            );
            if call.result.is_none() {
                call.result = Some(json!({
                    "error": format!("tool call arguments failed to parse: {err}"),
                    "raw_args": joined,
                }));
            }
        }
    }
    call.args_chunks.clear();
}
