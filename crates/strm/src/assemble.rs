//! Message assembly state machine.
//!
//! Folds decoded wire events into `Message` aggregates held in the shared
//! store. Per message the state machine is small (`Open` on first event,
//! `Open` after every merge, `Terminal` once a finish reason or interrupt
//! lands, no way back out), but the per-variant merge rules carry all of
//! the protocol's subtlety.
//!
//! Design rules:
//!
//! 1. **One writer per id.** Mutation happens inside the store's entry
//!    lock, driven by whichever stream delivered the event. Streams
//!    interleave across ids, never within one.
//! 2. **Terminal is forever.** Events addressing a finished message are
//!    protocol violations: logged and refused. The one exception is
//!    reference information, which correlates by task id and may legally
//!    arrive after the finish; it attaches evidence, it does not mutate
//!    content.
//! 3. **Every applied merge publishes.** Callers receive a fresh deep
//!    snapshot per event, even when the merge changed nothing, so the
//!    renderer never aliases live state.
//! 4. **Tool arguments assemble late.** Fragments accumulate in receipt
//!    order and parse exactly once, at finalization (see [`crate::toolcall`]).

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use strm_protocol::{
    Event, EventEnvelope, FinishReason, InterruptEvent, KnowledgeBaseResult, Message,
    MessageChunkEvent, ReferenceInformationEvent, ToolCallDeltaEvent, ToolCallResultEvent,
};

use crate::store::MessageStore;
use crate::toolcall;

/// What applying one event produced.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The target message was merged; this snapshot must reach subscribers.
    Publish(Arc<Message>),
    /// Nothing to publish: unknown event type, or a best-effort correlation
    /// miss.
    Skip,
    /// The event addressed a terminal message and was refused.
    Violation,
}

impl ApplyOutcome {
    pub fn snapshot(self) -> Option<Arc<Message>> {
        match self {
            ApplyOutcome::Publish(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Folds events into the shared message store.
#[derive(Clone, Default)]
pub struct Assembler {
    store: Arc<MessageStore>,
}

impl Assembler {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Apply one decoded event to the store.
    pub fn apply(&self, event: Event) -> ApplyOutcome {
        match event {
            Event::MessageChunk(ev) => self.merge_message_chunk(ev),
            Event::ToolCalls(ev) | Event::ToolCallChunks(ev) => self.merge_tool_call_delta(ev),
            Event::ToolCallResult(ev) => self.merge_tool_call_result(ev),
            Event::Interrupt(ev) => self.merge_interrupt(ev),
            Event::ReferenceInformation(ev) => self.merge_reference_information(ev),
            Event::Unknown => ApplyOutcome::Skip,
        }
    }

    // ========================================================================
    // Per-variant merge rules
    // ========================================================================

    fn merge_message_chunk(&self, ev: MessageChunkEvent) -> ApplyOutcome {
        let envelope = ev.envelope.clone();
        self.merge(&envelope, move |msg| {
            if let Some(delta) = ev.content.as_deref() {
                msg.append_content(delta);
            }
            if let Some(delta) = ev.reasoning_content.as_deref() {
                msg.append_reasoning(delta);
            }
            // Evidence fields are periodic full snapshots from the backend:
            // overwrite, never append.
            if let Some(results) = ev.knowledge_base_results {
                msg.knowledge_base_results = Some(dedupe_by_file_id(results));
            }
            if let Some(results) = ev.web_search_results {
                msg.web_search_results = Some(results);
            }
        })
    }

    fn merge_tool_call_delta(&self, ev: ToolCallDeltaEvent) -> ApplyOutcome {
        let envelope = ev.envelope.clone();
        self.merge(&envelope, move |msg| {
            // A named first declaration marks the list as authoritative and
            // replaces whatever streamed in before it.
            let authoritative = ev.tool_calls.first().is_some_and(|c| !c.name.is_empty());
            if authoritative {
                toolcall::declare_calls(&mut msg.tool_calls, &ev.tool_calls);
            }
            for chunk in &ev.tool_call_chunks {
                toolcall::apply_chunk(&mut msg.tool_calls, chunk);
            }
        })
    }

    fn merge_tool_call_result(&self, ev: ToolCallResultEvent) -> ApplyOutcome {
        let envelope = ev.envelope.clone();
        self.merge(&envelope, move |msg| {
            match msg.tool_call_mut(&ev.tool_call_id) {
                Some(call) => call.result = Some(ev.result),
                None => debug!(
                    "result for unknown tool call {} on message {}; ignoring",
                    ev.tool_call_id, msg.id
                ),
            }
        })
    }

    fn merge_interrupt(&self, ev: InterruptEvent) -> ApplyOutcome {
        let mut envelope = ev.envelope.clone();
        // An interrupt closes the message even when the backend omits the
        // reason.
        envelope.finish_reason = Some(envelope.finish_reason.unwrap_or(FinishReason::Interrupt));
        self.merge(&envelope, move |msg| {
            msg.options = Some(ev.options);
        })
    }

    fn merge_reference_information(&self, ev: ReferenceInformationEvent) -> ApplyOutcome {
        let task_id = ev.envelope.task_id.clone();
        // Correlates by task, not id, and skips the terminal guard: evidence
        // may arrive after the message closed and must still attach.
        let merged = self.store.with_task_message(&task_id, move |msg| {
            if let Some(results) = ev.knowledge_base_results {
                msg.knowledge_base_results = Some(dedupe_by_file_id(results));
            }
            if let Some(results) = ev.web_search_results {
                msg.web_search_results = Some(results);
            }
            Arc::new(msg.clone())
        });
        match merged {
            Some(snapshot) => ApplyOutcome::Publish(snapshot),
            None => {
                debug!("reference information for unknown task {task_id}; dropping");
                ApplyOutcome::Skip
            }
        }
    }

    // ========================================================================
    // Shared merge path
    // ========================================================================

    /// Id-keyed merge: create-if-unseen, refuse if terminal, mutate,
    /// finalize when the envelope says so, snapshot.
    fn merge(&self, envelope: &EventEnvelope, mutate: impl FnOnce(&mut Message)) -> ApplyOutcome {
        self.store.with_message(envelope, |msg| {
            if msg.is_terminal() {
                warn!("dropping event for terminal message {}", msg.id);
                return ApplyOutcome::Violation;
            }
            mutate(msg);
            if let Some(reason) = envelope.finish_reason {
                finalize(msg, reason);
            }
            ApplyOutcome::Publish(Arc::new(msg.clone()))
        })
    }
}

/// Close a message: record the reason, stop streaming, assemble tool
/// arguments from their pending fragments.
fn finalize(msg: &mut Message, reason: FinishReason) {
    msg.finish_reason = Some(reason);
    msg.is_streaming = false;
    for call in &mut msg.tool_calls {
        toolcall::finalize_args(call);
    }
}

/// Unique by `file_id`, first occurrence wins, order preserved.
fn dedupe_by_file_id(results: Vec<KnowledgeBaseResult>) -> Vec<KnowledgeBaseResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.file_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strm_protocol::{Role, ToolCallChunk, ToolCallDecl, WebSearchResult};

    fn envelope(id: &str) -> EventEnvelope {
        EventEnvelope {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            task_id: format!("task-{id}"),
            agent: "researcher".to_string(),
            role: Role::Assistant,
            finish_reason: None,
        }
    }

    fn content_chunk(id: &str, delta: &str) -> Event {
        Event::MessageChunk(MessageChunkEvent {
            envelope: envelope(id),
            content: Some(delta.to_string()),
            reasoning_content: None,
            knowledge_base_results: None,
            web_search_results: None,
        })
    }

    fn finishing_chunk(id: &str, delta: &str, reason: FinishReason) -> Event {
        let mut env = envelope(id);
        env.finish_reason = Some(reason);
        Event::MessageChunk(MessageChunkEvent {
            envelope: env,
            content: Some(delta.to_string()),
            reasoning_content: None,
            knowledge_base_results: None,
            web_search_results: None,
        })
    }

    fn kb(file_id: &str) -> KnowledgeBaseResult {
        KnowledgeBaseResult {
            file_id: file_id.to_string(),
            file_name: Some(format!("{file_id}.md")),
            content: None,
            score: None,
        }
    }

    fn publish(outcome: ApplyOutcome) -> Arc<Message> {
        match outcome {
            ApplyOutcome::Publish(snapshot) => snapshot,
            other => panic!("expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn test_content_appends_in_receipt_order() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "A")));
        let snap = publish(assembler.apply(content_chunk("m1", "B")));

        assert_eq!(snap.content, "AB");
        assert_eq!(snap.content_chunks, vec!["A", "B"]);
        assert!(snap.is_streaming);
        assert_eq!(snap.finish_reason, None);
    }

    #[test]
    fn test_end_to_end_finish_stop() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "A")));
        let snap = publish(assembler.apply(finishing_chunk("m1", "B", FinishReason::Stop)));

        assert_eq!(snap.content, "AB");
        assert!(!snap.is_streaming);
        assert_eq!(snap.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_terminal_message_refuses_all_merges() {
        let assembler = Assembler::default();
        publish(assembler.apply(finishing_chunk("m1", "done", FinishReason::Stop)));

        match assembler.apply(content_chunk("m1", "late")) {
            ApplyOutcome::Violation => {}
            other => panic!("expected Violation, got {:?}", other),
        }

        let msg = assembler.store().get("m1").unwrap();
        assert_eq!(msg.content, "done");
        assert_eq!(msg.finish_reason, Some(FinishReason::Stop));
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_snapshots_are_copies_not_references() {
        let assembler = Assembler::default();
        // A chunk with no deltas changes nothing, so two of them yield
        // deeply equal snapshots. They must still be distinct copies.
        let empty = |id: &str| {
            Event::MessageChunk(MessageChunkEvent {
                envelope: envelope(id),
                content: None,
                reasoning_content: None,
                knowledge_base_results: None,
                web_search_results: None,
            })
        };
        let first = publish(assembler.apply(empty("m1")));
        let second = publish(assembler.apply(empty("m1")));

        assert_eq!(*first, *second);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_snapshot_isolated_from_later_merges() {
        let assembler = Assembler::default();
        let snap = publish(assembler.apply(content_chunk("m1", "A")));
        publish(assembler.apply(content_chunk("m1", "B")));

        assert_eq!(snap.content, "A");
        assert_eq!(assembler.store().get("m1").unwrap().content, "AB");
    }

    #[test]
    fn test_named_declaration_replaces_tool_calls() {
        let assembler = Assembler::default();
        let declare = |id: &str, name: &str| {
            Event::ToolCalls(ToolCallDeltaEvent {
                envelope: envelope("m1"),
                tool_calls: vec![ToolCallDecl {
                    id: id.to_string(),
                    name: name.to_string(),
                    args: None,
                }],
                tool_call_chunks: Vec::new(),
            })
        };

        publish(assembler.apply(declare("c1", "search")));
        let snap = publish(assembler.apply(declare("c2", "fetch")));

        assert_eq!(snap.tool_calls.len(), 1);
        assert_eq!(snap.tool_calls[0].id, "c2");
        assert_eq!(snap.tool_calls[0].name, "fetch");
    }

    #[test]
    fn test_unnamed_declaration_does_not_replace() {
        let assembler = Assembler::default();
        publish(assembler.apply(Event::ToolCalls(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: vec![ToolCallDecl {
                id: "c1".to_string(),
                name: "search".to_string(),
                args: None,
            }],
            tool_call_chunks: Vec::new(),
        })));

        // Nameless declaration list: the existing calls survive, and the
        // chunk still lands on c1.
        let snap = publish(assembler.apply(Event::ToolCallChunks(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: vec![ToolCallDecl {
                id: "c1".to_string(),
                name: String::new(),
                args: None,
            }],
            tool_call_chunks: vec![ToolCallChunk {
                id: Some("c1".to_string()),
                name: None,
                args: "{\"q\":1}".to_string(),
            }],
        })));

        assert_eq!(snap.tool_calls.len(), 1);
        assert_eq!(snap.tool_calls[0].name, "search");
        assert_eq!(snap.tool_calls[0].args_chunks, vec!["{\"q\":1}"]);
    }

    #[test]
    fn test_fragmented_tool_args_assemble_on_finish() {
        let assembler = Assembler::default();
        publish(assembler.apply(Event::ToolCallChunks(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: Vec::new(),
            tool_call_chunks: vec![ToolCallChunk {
                id: Some("c1".to_string()),
                name: Some("search".to_string()),
                args: "{\"a\":".to_string(),
            }],
        })));
        publish(assembler.apply(Event::ToolCallChunks(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: Vec::new(),
            tool_call_chunks: vec![ToolCallChunk {
                id: None,
                name: None,
                args: "1}".to_string(),
            }],
        })));

        let mut env = envelope("m1");
        env.finish_reason = Some(FinishReason::ToolCalls);
        let snap = publish(assembler.apply(Event::ToolCalls(ToolCallDeltaEvent {
            envelope: env,
            tool_calls: Vec::new(),
            tool_call_chunks: Vec::new(),
        })));

        assert_eq!(snap.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(snap.tool_calls[0].args, Some(json!({"a": 1})));
        assert!(snap.tool_calls[0].args_chunks.is_empty());
    }

    #[test]
    fn test_unparseable_args_surface_as_error_result() {
        let assembler = Assembler::default();
        publish(assembler.apply(Event::ToolCallChunks(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: Vec::new(),
            tool_call_chunks: vec![ToolCallChunk {
                id: Some("c1".to_string()),
                name: Some("search".to_string()),
                args: "{broken".to_string(),
            }],
        })));

        let snap = publish(assembler.apply(finishing_chunk("m1", "", FinishReason::Stop)));
        let call = &snap.tool_calls[0];
        assert_eq!(call.args, None);
        assert!(call.result.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("failed to parse"));
        // The message itself still finalized normally.
        assert_eq!(snap.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_tool_call_result_attaches_by_id() {
        let assembler = Assembler::default();
        publish(assembler.apply(Event::ToolCalls(ToolCallDeltaEvent {
            envelope: envelope("m1"),
            tool_calls: vec![ToolCallDecl {
                id: "c1".to_string(),
                name: "search".to_string(),
                args: None,
            }],
            tool_call_chunks: Vec::new(),
        })));

        let snap = publish(assembler.apply(Event::ToolCallResult(ToolCallResultEvent {
            envelope: envelope("m1"),
            tool_call_id: "c1".to_string(),
            result: json!({"rows": 3}),
        })));
        assert_eq!(snap.tool_calls[0].result, Some(json!({"rows": 3})));
    }

    #[test]
    fn test_result_for_unknown_call_is_noop_merge() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "A")));

        let snap = publish(assembler.apply(Event::ToolCallResult(ToolCallResultEvent {
            envelope: envelope("m1"),
            tool_call_id: "c-missing".to_string(),
            result: json!(1),
        })));
        assert!(snap.tool_calls.is_empty());
        assert_eq!(snap.content, "A");
    }

    #[test]
    fn test_interrupt_sets_options_and_closes() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "pick one")));

        let snap = publish(assembler.apply(Event::Interrupt(InterruptEvent {
            envelope: envelope("m1"),
            options: vec![json!("approve"), json!("reject")],
        })));

        assert!(!snap.is_streaming);
        assert_eq!(snap.finish_reason, Some(FinishReason::Interrupt));
        assert_eq!(snap.options.as_ref().unwrap().len(), 2);

        // Interrupted means closed: further merges are violations.
        match assembler.apply(content_chunk("m1", "late")) {
            ApplyOutcome::Violation => {}
            other => panic!("expected Violation, got {:?}", other),
        }
    }

    #[test]
    fn test_message_chunk_evidence_overwrites() {
        let assembler = Assembler::default();
        let with_kb = |ids: &[&str]| {
            Event::MessageChunk(MessageChunkEvent {
                envelope: envelope("m1"),
                content: None,
                reasoning_content: None,
                knowledge_base_results: Some(ids.iter().map(|id| kb(id)).collect()),
                web_search_results: None,
            })
        };

        publish(assembler.apply(with_kb(&["f1", "f2"])));
        let snap = publish(assembler.apply(with_kb(&["f3"])));

        let results = snap.knowledge_base_results.as_ref().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, "f3");
    }

    #[test]
    fn test_reference_information_merges_by_task() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "A")));

        let mut env = envelope("m1");
        env.id = String::new(); // side channel carries the task key, not a usable id
        env.task_id = "task-m1".to_string();
        let snap = publish(assembler.apply(Event::ReferenceInformation(
            ReferenceInformationEvent {
                envelope: env,
                knowledge_base_results: Some(vec![kb("f1"), kb("f1"), kb("f2")]),
                web_search_results: Some(vec![WebSearchResult {
                    title: "hit".to_string(),
                    url: Some("https://example.com".to_string()),
                    content: None,
                }]),
            },
        )));

        assert_eq!(snap.id, "m1");
        let results = snap.knowledge_base_results.as_ref().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_id, "f1");
        assert_eq!(results[1].file_id, "f2");
        assert_eq!(snap.web_search_results.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_reference_information_unknown_task_is_silent_noop() {
        let assembler = Assembler::default();
        publish(assembler.apply(content_chunk("m1", "A")));

        let mut env = envelope("m-unrelated");
        env.task_id = "task-nobody".to_string();
        match assembler.apply(Event::ReferenceInformation(ReferenceInformationEvent {
            envelope: env,
            knowledge_base_results: Some(vec![kb("f1")]),
            web_search_results: None,
        })) {
            ApplyOutcome::Skip => {}
            other => panic!("expected Skip, got {:?}", other),
        }

        let msg = assembler.store().get("m1").unwrap();
        assert_eq!(msg.knowledge_base_results, None);
        assert_eq!(assembler.store().len(), 1);
    }

    #[test]
    fn test_reference_information_lands_after_finish() {
        let assembler = Assembler::default();
        publish(assembler.apply(finishing_chunk("m1", "done", FinishReason::Stop)));

        let mut env = envelope("m1");
        env.task_id = "task-m1".to_string();
        let snap = publish(assembler.apply(Event::ReferenceInformation(
            ReferenceInformationEvent {
                envelope: env,
                knowledge_base_results: Some(vec![kb("f1")]),
                web_search_results: None,
            },
        )));

        // Evidence attached, terminal fields untouched.
        assert_eq!(snap.finish_reason, Some(FinishReason::Stop));
        assert_eq!(snap.content, "done");
        assert_eq!(snap.knowledge_base_results.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_reasoning_channel_independent_of_content() {
        let assembler = Assembler::default();
        publish(assembler.apply(Event::MessageChunk(MessageChunkEvent {
            envelope: envelope("m1"),
            content: Some("visible".to_string()),
            reasoning_content: Some("hidden".to_string()),
            knowledge_base_results: None,
            web_search_results: None,
        })));
        let snap = publish(assembler.apply(Event::MessageChunk(MessageChunkEvent {
            envelope: envelope("m1"),
            content: None,
            reasoning_content: Some(" chain".to_string()),
            knowledge_base_results: None,
            web_search_results: None,
        })));

        assert_eq!(snap.content, "visible");
        assert_eq!(snap.reasoning_content, "hidden chain");
        assert_eq!(snap.reasoning_content_chunks, vec!["hidden", " chain"]);
    }

    #[test]
    fn test_unknown_event_skipped() {
        let assembler = Assembler::default();
        match assembler.apply(Event::Unknown) {
            ApplyOutcome::Skip => {}
            other => panic!("expected Skip, got {:?}", other),
        }
        assert!(assembler.store().is_empty());
    }
}
