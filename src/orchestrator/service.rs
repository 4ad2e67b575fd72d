//! Orchestrator construction and shared state.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{UiEvent, UiEventSender};
use super::worker::{CompressionQueue, CompressionWorker};
use crate::api::ApiClient;
use crate::db::Store;
use crate::pricing::{pricing, PricingTable};

/// Depth of the compression FIFO. IDs are deduplicated before entering, so
/// this bounds distinct conversations awaiting compression.
const COMPRESSION_QUEUE_DEPTH: usize = 64;

/// Owns the foreground turn lifecycle and the background compression
/// worker. The worker is a single dedicated task — compression never runs
/// on the foreground task, which is the entire point of doing it in the
/// background.
pub struct Orchestrator {
    pub(super) store: Store,
    pub(super) api: Arc<dyn ApiClient>,
    pub(super) pricing: &'static PricingTable,
    pub(super) ui_tx: Option<UiEventSender>,
    pub(super) queue: CompressionQueue,
}

impl Orchestrator {
    /// Create the orchestrator and spawn its compression worker. Must be
    /// called from within a tokio runtime.
    pub fn new(store: Store, api: Arc<dyn ApiClient>) -> Self {
        Self::with_ui_sender(store, api, None)
    }

    pub fn with_ui_sender(
        store: Store,
        api: Arc<dyn ApiClient>,
        ui_tx: Option<UiEventSender>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMPRESSION_QUEUE_DEPTH);
        let queue = CompressionQueue::new(tx);
        let worker = CompressionWorker::new(
            store.clone(),
            Arc::clone(&api),
            ui_tx.clone(),
            queue.clone(),
        );
        tokio::spawn(worker.run(rx));

        Self {
            store,
            api,
            pricing: pricing(),
            ui_tx,
            queue,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Hand a conversation to the compression worker. A no-op when the
    /// conversation is already queued or in flight; the worker itself
    /// decides whether compression is actually due.
    pub fn maybe_schedule_compression(&self, conversation_id: Uuid) {
        self.queue.enqueue(conversation_id);
    }

    pub(super) fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.ui_tx {
            let _ = tx.send(event);
        }
    }
}
