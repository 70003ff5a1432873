//! The shared message store.
//!
//! A keyed arena: message id → canonical `Message`, plus a task index for
//! side-channel correlation. Write access is partitioned by id (one
//! producing stream per id), so interleaved streams never contend on the
//! same message; the map itself tolerates concurrent writers across ids.
//! Readers never see the live map, only cloned snapshots.
//!
//! Messages are created here and mutated here; they are never deleted.
//! Retention is the embedding application's problem.

use dashmap::DashMap;
use strm_protocol::{EventEnvelope, Message};

/// Keyed arena of in-flight and completed messages.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: DashMap<String, Message>,
    by_task: DashMap<String, String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `mutate` against the message for this envelope's id, creating the
    /// message first if the id is unseen.
    ///
    /// This is the only id-keyed mutation entry point; every event variant
    /// funnels through it.
    pub(crate) fn with_message<R>(
        &self,
        envelope: &EventEnvelope,
        mutate: impl FnOnce(&mut Message) -> R,
    ) -> R {
        if !self.messages.contains_key(&envelope.id) && !envelope.task_id.is_empty() {
            self.by_task
                .insert(envelope.task_id.clone(), envelope.id.clone());
        }
        let mut entry = self.messages.entry(envelope.id.clone()).or_insert_with(|| {
            Message::new(
                envelope.id.as_str(),
                envelope.thread_id.as_str(),
                envelope.task_id.as_str(),
                envelope.agent.as_str(),
                envelope.role,
            )
        });
        mutate(entry.value_mut())
    }

    /// Run `mutate` against the message indexed by `task_id`, if any.
    ///
    /// Unlike [`Self::with_message`] this never creates a message: the task
    /// index only knows ids that some primary event already opened.
    pub(crate) fn with_task_message<R>(
        &self,
        task_id: &str,
        mutate: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        let id = self.by_task.get(task_id)?.value().clone();
        let mut entry = self.messages.get_mut(&id)?;
        Some(mutate(entry.value_mut()))
    }

    /// Cloned snapshot of one message.
    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages.get(id).map(|entry| entry.value().clone())
    }

    /// Cloned snapshot of the message a task maps to.
    pub fn get_by_task(&self, task_id: &str) -> Option<Message> {
        let id = self.by_task.get(task_id)?.value().clone();
        self.get(&id)
    }

    /// Cloned snapshots of every message, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        let mut all: Vec<Message> = self
            .messages
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
