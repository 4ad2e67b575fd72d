mod priority;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::*;
use crate::api::{
    ApiClient, ApiError, ChatRequest, ChatStream, CompressRequest, StreamEvent, TokenUsage,
};
use crate::db::{Conversation, Database, Message, Project, ProjectSettings, Store};

/// Mock provider: scripted chat stream and compression results, with every
/// request captured for assertions.
pub(super) struct MockApi {
    pub chat_text: StdMutex<String>,
    pub chat_usage: StdMutex<TokenUsage>,
    /// When false the stream ends without the final usage report, as an
    /// aborted stream does.
    pub complete_stream: StdMutex<bool>,
    pub chat_requests: StdMutex<Vec<ChatRequest>>,
    pub compress_requests: StdMutex<Vec<CompressRequest>>,
    /// Scripted compression outcomes, consumed front to back; when empty,
    /// `default_summary` is returned.
    pub compress_results: StdMutex<VecDeque<Result<String, ApiError>>>,
    pub default_summary: StdMutex<String>,
    /// Simulated duration of each summariser call.
    pub compress_delay: StdMutex<Duration>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chat_text: StdMutex::new("This is a test response".to_string()),
            chat_usage: StdMutex::new(TokenUsage {
                input_tokens: 1000,
                output_tokens: 200,
                cache_read_input_tokens: 0,
                cache_creation_input_tokens: 0,
            }),
            complete_stream: StdMutex::new(true),
            chat_requests: StdMutex::new(Vec::new()),
            compress_requests: StdMutex::new(Vec::new()),
            compress_results: StdMutex::new(VecDeque::new()),
            default_summary: StdMutex::new("decisions so far: use sqlite".to_string()),
            compress_delay: StdMutex::new(Duration::ZERO),
        })
    }

    pub fn set_chat_usage(&self, usage: TokenUsage) {
        *self.chat_usage.lock().unwrap() = usage;
    }

    pub fn set_complete_stream(&self, complete: bool) {
        *self.complete_stream.lock().unwrap() = complete;
    }

    pub fn set_default_summary(&self, summary: &str) {
        *self.default_summary.lock().unwrap() = summary.to_string();
    }

    pub fn set_compress_delay(&self, delay: Duration) {
        *self.compress_delay.lock().unwrap() = delay;
    }

    pub fn script_compress(&self, result: Result<String, ApiError>) {
        self.compress_results.lock().unwrap().push_back(result);
    }

    pub fn chat_request_count(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn compress_request_count(&self) -> usize {
        self.compress_requests.lock().unwrap().len()
    }

    pub fn chat_request(&self, index: usize) -> ChatRequest {
        self.chat_requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn chat(&self, request: ChatRequest, _cancel: CancellationToken) -> crate::api::Result<ChatStream> {
        let model = request.model.clone();
        self.chat_requests.lock().unwrap().push(request);

        let text = self.chat_text.lock().unwrap().clone();
        let usage = *self.chat_usage.lock().unwrap();
        let complete = *self.complete_stream.lock().unwrap();

        let input_only = TokenUsage {
            output_tokens: 0,
            ..usage
        };
        let mut events: Vec<crate::api::Result<StreamEvent>> = vec![Ok(StreamEvent::MessageStart {
            model,
            usage: input_only,
        })];
        let mid = text.len() / 2;
        let mid = (0..=mid).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        for chunk in [&text[..mid], &text[mid..]] {
            if !chunk.is_empty() {
                events.push(Ok(StreamEvent::TextDelta {
                    text: chunk.to_string(),
                }));
            }
        }
        if complete {
            events.push(Ok(StreamEvent::MessageDelta {
                stop_reason: Some("end_turn".to_string()),
                usage,
            }));
            events.push(Ok(StreamEvent::MessageStop));
        }
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn compress(
        &self,
        request: CompressRequest,
        _cancel: CancellationToken,
    ) -> crate::api::Result<String> {
        self.compress_requests.lock().unwrap().push(request);
        let delay = *self.compress_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        match self.compress_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.default_summary.lock().unwrap().clone()),
        }
    }
}

// === Shared helpers ===

pub(super) async fn create_test_orchestrator(
    api: Arc<MockApi>,
) -> (
    Orchestrator,
    Store,
    mpsc::UnboundedReceiver<UiEvent>,
    Project,
    Conversation,
) {
    let db = Database::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    let store = Store::new(db);

    let project = store
        .create_project(
            "Test Project".to_string(),
            "You are a Python expert.".to_string(),
            "claude-sonnet-4-6".to_string(),
            ProjectSettings::default(),
        )
        .await
        .unwrap();
    let conversation = store
        .create_conversation(project.id, "Test".to_string(), None)
        .await
        .unwrap();

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::with_ui_sender(store.clone(), api, Some(ui_tx));

    (orchestrator, store, ui_rx, project, conversation)
}

/// Append `pairs` complete turns directly to the store, with strictly
/// increasing timestamps.
pub(super) async fn seed_turns(store: &Store, conversation_id: Uuid, pairs: usize) -> Vec<Message> {
    let base = Utc::now();
    let mut seeded = Vec::new();
    for i in 0..pairs {
        let mut user = Message::user(conversation_id, format!("user {}", i));
        user.created_at = base + chrono::Duration::milliseconds(i as i64 * 2);
        let mut assistant = Message::assistant(conversation_id, format!("assistant {}", i));
        assistant.created_at = base + chrono::Duration::milliseconds(i as i64 * 2 + 1);
        store.append_message(user.clone()).await.unwrap();
        store.append_message(assistant.clone()).await.unwrap();
        seeded.push(user);
        seeded.push(assistant);
    }
    seeded
}

/// Poll until the conversation has a rolling summary. Compression runs on
/// the worker task, so completion is observed through the store.
pub(super) async fn wait_for_summary(store: &Store, conversation_id: Uuid) -> Conversation {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let conversation = store.get_conversation(conversation_id).await.unwrap();
        if conversation.rolling_summary.is_some() {
            return conversation;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("compression did not complete in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub(super) fn drain_events(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
