//! Foreground turn state machine.
//!
//! Idle → Building → Streaming → Finalising → Idle. The draft assistant
//! message is owned here until finalisation, then handed to the store with
//! usage counters backfilled from the provider's final report.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::service::Orchestrator;
use super::types::{OrchestratorError, OrchestratorResult, TurnPhase, UiEvent};
use crate::api::{ApiError, StreamEvent, TokenUsage};
use crate::context::{self, Estimate};
use crate::db::Message;

impl Orchestrator {
    /// Run one foreground turn: persist the user message, stream the
    /// assistant response, commit it, and schedule compression.
    ///
    /// Cancellation ends the stream at the next chunk boundary; whatever
    /// text arrived is committed with usage counters absent and a null
    /// cost.
    pub async fn send(
        &self,
        conversation_id: Uuid,
        text: String,
        cancel: CancellationToken,
    ) -> OrchestratorResult<Message> {
        self.emit(UiEvent::Phase {
            conversation_id,
            phase: TurnPhase::Building,
        });

        let conversation = self.store.get_conversation(conversation_id).await?;
        let project = self.store.get_project(conversation.project_id).await?;
        let documents = self.store.list_documents(project.id).await?;
        let history = self.store.get_messages(conversation_id).await?;

        // Build before persisting anything: a too-large context fails the
        // turn without leaving a dangling user message.
        let built = context::build(
            &project,
            &documents,
            &conversation,
            &history,
            &text,
            self.pricing,
        )
        .inspect_err(|_| {
            self.emit(UiEvent::Phase {
                conversation_id,
                phase: TurnPhase::Idle,
            });
        })?;

        let user_message = Message::user(conversation_id, text);
        {
            let lock = self.store.conversation_lock(conversation_id);
            let _guard = lock.lock().await;
            self.store.append_message(user_message).await?;
        }

        self.emit(UiEvent::Phase {
            conversation_id,
            phase: TurnPhase::Streaming,
        });

        let requested_model = built.request.model.clone();
        let ttl = project.settings.cache_ttl;
        let mut stream = match self.api.chat(built.request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.emit(UiEvent::Phase {
                    conversation_id,
                    phase: TurnPhase::Idle,
                });
                return Err(err.into());
            }
        };

        let mut content = String::new();
        let mut thinking = String::new();
        let mut usage = TokenUsage::default();
        let mut model_used = requested_model;
        let mut usage_final = false;
        let mut stream_error: Option<ApiError> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamEvent::MessageStart { model, usage: u }) => {
                    if !model.is_empty() {
                        model_used = model;
                    }
                    usage.merge_max(u);
                }
                Ok(StreamEvent::TextDelta { text }) => {
                    content.push_str(&text);
                    self.emit(UiEvent::Chunk {
                        conversation_id,
                        text,
                    });
                }
                Ok(StreamEvent::ThinkingDelta { thinking: delta }) => {
                    thinking.push_str(&delta);
                    self.emit(UiEvent::Thinking {
                        conversation_id,
                        text: delta,
                    });
                }
                Ok(StreamEvent::MessageDelta { usage: u, .. }) => {
                    usage.merge_max(u);
                    usage_final = true;
                }
                Ok(StreamEvent::MessageStop) => break,
                Ok(StreamEvent::Ping) => {}
                Err(err) => {
                    stream_error = Some(err);
                    break;
                }
            }
        }

        self.emit(UiEvent::Phase {
            conversation_id,
            phase: TurnPhase::Finalising,
        });

        if let Some(err) = stream_error {
            if content.is_empty() {
                // Nothing reached the user; the turn failed outright.
                self.emit(UiEvent::Phase {
                    conversation_id,
                    phase: TurnPhase::Idle,
                });
                return Err(err.into());
            }
            // Partial output was already shown; keep it and say so.
            tracing::warn!("stream ended early, committing partial response: {}", err);
            self.emit(UiEvent::Warning {
                conversation_id,
                message: format!("response interrupted: {}", err),
            });
        }

        // Usage counters only count once the provider's final report
        // arrived; an aborted stream commits with a null cost.
        let mut assistant = Message::assistant(conversation_id, content);
        assistant.model_used = Some(model_used.clone());
        if !thinking.is_empty() {
            assistant.thinking = Some(thinking);
        }
        let (reported_usage, cost) = if usage_final {
            let cost = self.pricing.cost(&model_used, &usage, ttl);
            assistant.input_tokens = Some(usage.input_tokens as i64);
            assistant.output_tokens = Some(usage.output_tokens as i64);
            assistant.cache_read_tokens = Some(usage.cache_read_input_tokens as i64);
            assistant.cache_creation_tokens = Some(usage.cache_creation_input_tokens as i64);
            assistant.cost_usd = Some(cost);
            (Some(usage), Some(cost))
        } else {
            (None, None)
        };

        {
            let lock = self.store.conversation_lock(conversation_id);
            let _guard = lock.lock().await;
            self.store.append_message(assistant.clone()).await?;
        }

        self.emit(UiEvent::ResponseComplete {
            conversation_id,
            message_id: assistant.id,
            usage: reported_usage,
            cost_usd: cost,
        });
        self.emit(UiEvent::Phase {
            conversation_id,
            phase: TurnPhase::Idle,
        });

        self.maybe_schedule_compression(conversation_id);

        Ok(assistant)
    }

    /// Cost preview for the turn the user is about to send. Shares the
    /// assembler with [`send`] — never a heuristic.
    pub async fn estimate(
        &self,
        conversation_id: Uuid,
        text: &str,
    ) -> OrchestratorResult<Estimate> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let project = self.store.get_project(conversation.project_id).await?;
        let documents = self.store.list_documents(project.id).await?;
        let history = self.store.get_messages(conversation_id).await?;
        context::estimate(
            &project,
            &documents,
            &conversation,
            &history,
            text,
            self.pricing,
        )
        .map_err(OrchestratorError::from)
    }
}
