//! Background compression worker.
//!
//! A single dedicated task drains a bounded FIFO of conversation IDs,
//! deduplicated so a conversation is never queued or compressed twice
//! concurrently. The worker never blocks the foreground: its API calls go
//! through the compress channel, which yields to chat under rate limits,
//! and a foreground turn racing an in-flight compression simply uses the
//! previous summary.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{UiEvent, UiEventSender};
use crate::api::{ApiClient, ApiError};
use crate::compress;
use crate::context;
use crate::db::{Store, StoreError};
use crate::tokenizer;

/// Pause before re-queueing pre-empted work, so a tight requeue loop
/// cannot starve the executor while the rate window is open.
const REQUEUE_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub(super) struct CompressionQueue {
    tx: mpsc::Sender<Uuid>,
    pending: Arc<StdMutex<HashSet<Uuid>>>,
}

impl CompressionQueue {
    pub(super) fn new(tx: mpsc::Sender<Uuid>) -> Self {
        Self {
            tx,
            pending: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Queue a conversation for compression. No-op if it is already queued
    /// or in flight.
    pub(super) fn enqueue(&self, id: Uuid) {
        {
            let mut pending = self.pending.lock().expect("compression queue poisoned");
            if !pending.insert(id) {
                return;
            }
        }
        if self.tx.try_send(id).is_err() {
            // Queue full or worker gone; drop and let the next completed
            // turn re-trigger.
            self.finish(id);
            tracing::warn!("compression queue full, dropping {}", id);
        }
    }

    /// Put an in-flight conversation back at the end of the queue, keeping
    /// its dedup slot.
    fn requeue(&self, id: Uuid) {
        if self.tx.try_send(id).is_err() {
            self.finish(id);
            tracing::warn!("compression queue full, dropping re-queued {}", id);
        }
    }

    fn finish(&self, id: Uuid) {
        self.pending
            .lock()
            .expect("compression queue poisoned")
            .remove(&id);
    }
}

enum Outcome {
    /// Summary committed or nothing to do.
    Done,
    /// Pre-empted or raced; try again later.
    Requeue,
}

pub(super) struct CompressionWorker {
    store: Store,
    api: Arc<dyn ApiClient>,
    ui_tx: Option<UiEventSender>,
    queue: CompressionQueue,
}

impl CompressionWorker {
    pub(super) fn new(
        store: Store,
        api: Arc<dyn ApiClient>,
        ui_tx: Option<UiEventSender>,
        queue: CompressionQueue,
    ) -> Self {
        Self {
            store,
            api,
            ui_tx,
            queue,
        }
    }

    pub(super) async fn run(self, mut rx: mpsc::Receiver<Uuid>) {
        tracing::debug!("compression worker started");
        while let Some(conversation_id) = rx.recv().await {
            match self.process(conversation_id).await {
                Ok(Outcome::Done) => self.queue.finish(conversation_id),
                Ok(Outcome::Requeue) => {
                    tokio::time::sleep(REQUEUE_DELAY).await;
                    self.queue.requeue(conversation_id);
                }
                Err(err) => {
                    tracing::warn!("compression of {} failed: {}", conversation_id, err);
                    self.queue.finish(conversation_id);
                }
            }
        }
        tracing::debug!("compression worker stopped");
    }

    async fn process(&self, conversation_id: Uuid) -> Result<Outcome, StoreError> {
        let conversation = match self.store.get_conversation(conversation_id).await {
            Ok(c) => c,
            // Deleted since it was queued.
            Err(StoreError::NotFound(_)) => return Ok(Outcome::Done),
            Err(e) => return Err(e),
        };
        let project = self.store.get_project(conversation.project_id).await?;
        let messages = self.store.get_messages(conversation_id).await?;
        let uncompressed =
            context::uncompressed_messages(&messages, conversation.last_compressed_msg_id);

        if !compress::should_compress(&project.settings, uncompressed) {
            return Ok(Outcome::Done);
        }
        let batch = match compress::select_batch(&project.settings, uncompressed) {
            Some(batch) => batch,
            None => return Ok(Outcome::Done),
        };

        let request = compress::build_request(
            &project.name,
            conversation.rolling_summary.as_deref(),
            &batch,
        );
        let mut summary = match self.api.compress(request, CancellationToken::new()).await {
            Ok(text) => text,
            Err(ApiError::RateLimited { .. }) | Err(ApiError::Cancelled) => {
                // Pre-empted by foreground traffic; state untouched.
                return Ok(Outcome::Requeue);
            }
            Err(err) => {
                // Keep the last good summary; the next completed turn
                // re-triggers. The foreground is never blocked.
                tracing::warn!("compression of {} failed: {}", conversation_id, err);
                self.warn(conversation_id, format!("compression failed: {}", err));
                return Ok(Outcome::Done);
            }
        };

        let mut token_count = tokenizer::count_tokens(&summary) as i64;
        if compress::needs_recompression(token_count) {
            let request = compress::build_recompress_request(&project.name, &summary);
            match self.api.compress(request, CancellationToken::new()).await {
                Ok(text) => {
                    summary = text;
                    token_count = tokenizer::count_tokens(&summary) as i64;
                }
                Err(err) => {
                    // The oversized summary is still correct; commit it and
                    // let the next cycle shrink it.
                    tracing::warn!("recompression of {} failed: {}", conversation_id, err);
                }
            }
        }

        let lock = self.store.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        // Re-check under the lock: a user reset (or another cycle) may have
        // moved the cutoff while the summariser ran. The update_summary
        // monotonicity check cannot catch a reset — it cleared the cutoff,
        // so committing now would resurrect the summary the user just
        // discarded. Rebuild from fresh state instead.
        let current = match self.store.get_conversation(conversation_id).await {
            Ok(c) => c,
            Err(StoreError::NotFound(_)) => return Ok(Outcome::Done),
            Err(e) => return Err(e),
        };
        if current.last_compressed_msg_id != conversation.last_compressed_msg_id {
            return Ok(Outcome::Requeue);
        }

        match self
            .store
            .update_summary(conversation_id, summary, batch.cutoff_msg_id, token_count)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "compressed {} turns of {} into {} summary tokens",
                    batch.turns.len(),
                    conversation_id,
                    token_count
                );
                if let Some(tx) = &self.ui_tx {
                    let _ = tx.send(UiEvent::SummaryUpdated {
                        conversation_id,
                        token_count,
                    });
                }
                Ok(Outcome::Done)
            }
            // Raced a concurrent writer; rebuild the batch from fresh state.
            Err(StoreError::StaleCutoff) => Ok(Outcome::Requeue),
            Err(err) => Err(err),
        }
    }

    fn warn(&self, conversation_id: Uuid, message: String) {
        if let Some(tx) = &self.ui_tx {
            let _ = tx.send(UiEvent::Warning {
                conversation_id,
                message,
            });
        }
    }
}
