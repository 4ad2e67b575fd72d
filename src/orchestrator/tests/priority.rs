//! End-to-end rate-limit priority: a foreground turn and an in-flight
//! background compression share one rate gate, and chat always wins.

use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::api::retry::{retry_with_backoff, RetryConfig};
use crate::api::RateGate;

/// Gate-aware provider. `chat` trips the shared gate on a scripted 429 and
/// retries through, exactly as the production client does; `compress`
/// acquires a gate permit and holds it for the duration of its (slow)
/// call, aborting when pre-empted.
struct PriorityApi {
    gate: Arc<RateGate>,
    /// Remaining chat attempts to answer with a 429.
    chat_rate_limits: StdMutex<u32>,
    compress_attempts: AtomicU32,
    /// The first summariser call is slow so the foreground turn lands
    /// while it is in flight.
    first_compress_duration: Duration,
}

impl PriorityApi {
    fn new(gate: Arc<RateGate>, chat_rate_limits: u32) -> Arc<Self> {
        Arc::new(Self {
            gate,
            chat_rate_limits: StdMutex::new(chat_rate_limits),
            compress_attempts: AtomicU32::new(0),
            first_compress_duration: Duration::from_millis(400),
        })
    }

    fn compress_attempt_count(&self) -> u32 {
        self.compress_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for PriorityApi {
    async fn chat(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> crate::api::Result<ChatStream> {
        let retry_config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };

        // Stream establishment, retried with backoff. A 429 trips the gate
        // so background work yields immediately; chat itself just retries.
        retry_with_backoff(
            || async {
                let rate_limited = {
                    let mut remaining = self.chat_rate_limits.lock().unwrap();
                    if *remaining > 0 {
                        *remaining -= 1;
                        true
                    } else {
                        false
                    }
                };
                if rate_limited {
                    self.gate.trip(Duration::from_millis(200));
                    return Err(ApiError::RateLimited {
                        retry_after: Some(0),
                        message: "overloaded".to_string(),
                    });
                }
                Ok(())
            },
            &retry_config,
        )
        .await?;

        let usage = TokenUsage {
            input_tokens: 500,
            output_tokens: 60,
            ..Default::default()
        };
        let events: Vec<crate::api::Result<StreamEvent>> = vec![
            Ok(StreamEvent::MessageStart {
                model: request.model,
                usage: TokenUsage {
                    output_tokens: 0,
                    ..usage
                },
            }),
            Ok(StreamEvent::TextDelta {
                text: "chat reply".to_string(),
            }),
            Ok(StreamEvent::MessageDelta {
                stop_reason: Some("end_turn".to_string()),
                usage,
            }),
            Ok(StreamEvent::MessageStop),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn compress(
        &self,
        _request: CompressRequest,
        cancel: CancellationToken,
    ) -> crate::api::Result<String> {
        let attempt = self.compress_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        // Queue behind the gate, like the production client: waits out any
        // retry-after window and holds the background slot.
        let permit = self.gate.acquire().await;

        let work = if attempt == 1 {
            self.first_compress_duration
        } else {
            Duration::from_millis(5)
        };
        tokio::select! {
            _ = tokio::time::sleep(work) => Ok("summary of the early turns".to_string()),
            _ = permit.preempt.cancelled() => Err(ApiError::Cancelled),
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
        }
    }
}

async fn create_priority_orchestrator(api: Arc<PriorityApi>) -> (Orchestrator, Store, Uuid) {
    let db = Database::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    let store = Store::new(db);

    let project = store
        .create_project(
            "Priority".to_string(),
            "You are terse.".to_string(),
            "claude-sonnet-4-6".to_string(),
            ProjectSettings::default(),
        )
        .await
        .unwrap();
    let conversation = store
        .create_conversation(project.id, "P".to_string(), None)
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(store.clone(), api);
    (orchestrator, store, conversation.id)
}

#[tokio::test]
async fn foreground_chat_preempts_inflight_compression() {
    let gate = Arc::new(RateGate::new());
    let api = PriorityApi::new(Arc::clone(&gate), 1);
    let (orchestrator, store, conversation_id) = create_priority_orchestrator(Arc::clone(&api)).await;

    seed_turns(&store, conversation_id, 11).await;
    orchestrator.maybe_schedule_compression(conversation_id);

    // Wait until the summariser call is in flight and holding the gate.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while api.compress_attempt_count() == 0 {
        if tokio::time::Instant::now() > deadline {
            panic!("compression never started");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The provider 429s the first chat attempt: the gate trips, the
    // in-flight compression aborts, and chat retries straight through —
    // it never waits on the gate.
    let reply = orchestrator
        .send(
            conversation_id,
            "urgent question".to_string(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.content, "chat reply");
    assert!(reply.cost_usd.is_some());

    // Chat completed ahead of the pre-empted compression: the summary has
    // not landed yet because the retry-after window is still open (or the
    // re-queued attempt is only just starting).
    let conversation = store.get_conversation(conversation_id).await.unwrap();
    assert!(conversation.rolling_summary.is_none());
    assert!(gate.is_backing_off() || api.compress_attempt_count() >= 2);

    // Once the window elapses, the re-queued compression completes.
    let compressed = wait_for_summary(&store, conversation_id).await;
    assert_eq!(
        compressed.rolling_summary.as_deref(),
        Some("summary of the early turns")
    );
    assert!(api.compress_attempt_count() >= 2);
}
