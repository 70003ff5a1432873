//! Snapshot publication and stream supervision.
//!
//! [`SnapshotHub`] is the subscribe/emit seam between the engine and the
//! rendering layer: every applied merge lands here as an immutable
//! `Arc<Message>` snapshot. [`StreamManager`] owns the hub plus the shared
//! store and wraps every stream run in its cancellation boundary and a
//! concurrency gate.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use log::{debug, info, warn};
use strm_protocol::Message;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assemble::Assembler;
use crate::config::StreamOptions;
use crate::error::StreamError;
use crate::pipeline::{self, StreamStats};
use crate::store::MessageStore;

/// Default capacity of the snapshot broadcast channel.
pub const SNAPSHOT_BUFFER_SIZE: usize = 256;

/// Fan-out point for assembled message snapshots.
///
/// A subscriber that falls more than the channel capacity behind loses the
/// oldest snapshots (broadcast lag). That is safe by construction: every
/// snapshot carries complete message state, so the next one heals the gap.
pub struct SnapshotHub {
    snapshot_tx: broadcast::Sender<Arc<Message>>,
}

impl SnapshotHub {
    pub fn new() -> Self {
        Self::with_capacity(SNAPSHOT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (snapshot_tx, _) = broadcast::channel(capacity);
        Self { snapshot_tx }
    }

    /// Receive every snapshot published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.snapshot_tx.subscribe()
    }

    /// Publish one snapshot. Silently dropped when nobody listens.
    pub fn publish(&self, snapshot: Arc<Message>) {
        let _ = self.snapshot_tx.send(snapshot);
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot_tx.receiver_count()
    }
}

impl Default for SnapshotHub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Stream supervision
// ============================================================================

/// Handle to one spawned stream.
pub struct StreamHandle {
    token: CancellationToken,
    task: JoinHandle<Result<StreamStats, StreamError>>,
}

impl StreamHandle {
    /// Request cooperative teardown; takes effect at the next frame read.
    /// Snapshots already published stay valid.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream to wind down and collect its counters.
    pub async fn join(self) -> Result<StreamStats, StreamError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(StreamError::Task(err.to_string())),
        }
    }
}

/// Owns the pipeline's fixed ends: one assembler over one shared store, one
/// snapshot hub, and the gate bounding concurrent in-flight streams.
#[derive(Clone)]
pub struct StreamManager {
    assembler: Assembler,
    hub: Arc<SnapshotHub>,
    gate: Arc<Semaphore>,
    options: StreamOptions,
}

impl StreamManager {
    pub fn new(options: StreamOptions) -> Self {
        Self {
            assembler: Assembler::new(Arc::new(MessageStore::new())),
            hub: Arc::new(SnapshotHub::with_capacity(options.snapshot_buffer)),
            gate: Arc::new(Semaphore::new(options.max_concurrent_streams)),
            options,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        self.assembler.store()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.hub.subscribe()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Drive one byte stream through the pipeline until end of stream,
    /// transport error, or cancellation. Waits for a concurrency slot
    /// first; the wait itself is cancellable.
    pub async fn process<S>(
        &self,
        stream: S,
        token: &CancellationToken,
    ) -> Result<StreamStats, StreamError>
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Unpin,
    {
        let run_id = Uuid::new_v4();
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("stream {run_id}: cancelled while waiting for a slot");
                return Ok(StreamStats {
                    cancelled: true,
                    ..StreamStats::default()
                });
            }
            permit = self.gate.acquire() => {
                permit.map_err(|err| StreamError::Task(err.to_string()))?
            }
        };

        info!("stream {run_id}: started");
        let result = pipeline::run_stream(
            stream,
            &self.assembler,
            &self.hub,
            token,
            self.options.max_pending_bytes,
        )
        .await;

        match &result {
            Ok(stats) => info!("stream {run_id}: finished: {stats}"),
            Err(err) => warn!("stream {run_id}: failed: {err}"),
        }
        result
    }

    /// Spawn a stream onto the runtime and hand back its handle.
    pub fn spawn<S>(&self, stream: S) -> StreamHandle
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Unpin + Send + 'static,
    {
        let token = CancellationToken::new();
        let manager = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move { manager.process(stream, &task_token).await });
        StreamHandle { token, task }
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new(StreamOptions::default())
    }
}
