//! Anthropic Messages API client.
//!
//! Two channels share one HTTP client: `chat` streams the foreground turn
//! and bypasses the rate gate; `compress` is the background summariser and
//! must hold a gate permit for the whole request. A 429 on either channel
//! trips the gate, aborting in-flight compressions and holding new ones
//! until the retry-after window elapses.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::client::{ApiClient, ChatStream};
use super::error::{ApiError, Result};
use super::rate_gate::RateGate;
use super::retry::{retry_with_backoff, RetryConfig};
use super::types::{ChatRequest, CompressRequest, StreamEvent, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const COMPACTION_BETA_HEADER: &str = "compact-2026-01-12";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Fallback hold-off when a 429 arrives without a retry-after header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: Client,
    gate: Arc<RateGate>,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Create with a custom base URL (proxies, mock servers).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            gate: Arc::new(RateGate::new()),
        }
    }

    pub fn rate_gate(&self) -> Arc<RateGate> {
        Arc::clone(&self.gate)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();

        // Trim whitespace/newlines that may have leaked from key entry.
        let clean_key = self.api_key.trim();
        let key_value: reqwest::header::HeaderValue = clean_key.parse().map_err(|_| {
            tracing::error!(
                "API key contains invalid characters (length={})",
                clean_key.len()
            );
            ApiError::InvalidApiKey
        })?;
        headers.insert("x-api-key", key_value);
        headers.insert(
            "anthropic-version",
            API_VERSION.parse().expect("valid version header"),
        );
        headers.insert(
            "anthropic-beta",
            COMPACTION_BETA_HEADER.parse().expect("valid beta header"),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().expect("valid content-type"),
        );

        Ok(headers)
    }

    /// Map a non-success response to an error. A 429 also trips the rate
    /// gate so background compression yields immediately.
    async fn handle_error(&self, response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let message = match response.json::<ErrorEnvelope>().await {
            Ok(body) => body.error.message,
            Err(_) => "unknown error".to_string(),
        };

        match status {
            401 | 403 => ApiError::Auth { status, message },
            429 => {
                self.gate.trip(
                    retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_RETRY_AFTER),
                );
                ApiError::RateLimited {
                    retry_after,
                    message,
                }
            }
            _ => ApiError::Api { status, message },
        }
    }
}

#[async_trait]
impl ApiClient for AnthropicClient {
    async fn chat(&self, request: ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        tracing::info!(
            "chat request: model={}, system_blocks={}, messages={}",
            request.model,
            request.system.len(),
            request.messages.len()
        );

        let retry_config = RetryConfig::default();

        // Retry only stream establishment. Once events flow, a dropped
        // connection surfaces as a stream error and is never replayed.
        let response = retry_with_backoff(
            || async {
                let response = self
                    .client
                    .post(self.messages_url())
                    .headers(self.headers()?)
                    .json(&request)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(self.handle_error(response).await);
                }

                Ok(response)
            },
            &retry_config,
        )
        .await?;

        let byte_stream = response.bytes_stream();
        let buffer = Arc::new(Mutex::new(String::new()));

        let event_stream = byte_stream
            .map(move |chunk_result| -> Vec<Result<StreamEvent>> {
                match chunk_result {
                    Err(e) => vec![Err(ApiError::Stream(e.to_string()))],
                    Ok(chunk) => {
                        let mut buf = buffer.lock().expect("SSE buffer lock poisoned");
                        buf.push_str(&String::from_utf8_lossy(&chunk));

                        let mut events = Vec::new();
                        // Process complete lines; data payloads carry their
                        // own "type" discriminant so event: lines are noise.
                        while let Some(newline_pos) = buf.find('\n') {
                            let line = buf[..newline_pos].trim().to_string();
                            buf.drain(..=newline_pos);

                            let json_str = match line.strip_prefix("data: ") {
                                Some(s) => s,
                                None => continue,
                            };

                            match serde_json::from_str::<SsePayload>(json_str) {
                                Ok(payload) => {
                                    if let Some(event) = payload.into_event() {
                                        events.push(event);
                                    }
                                }
                                Err(e) => {
                                    let preview: String = json_str.chars().take(200).collect();
                                    tracing::warn!(
                                        "failed to parse SSE payload: {} | raw: {}",
                                        e,
                                        preview
                                    );
                                }
                            }
                        }
                        events
                    }
                }
            })
            .flat_map(futures::stream::iter)
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(event_stream))
    }

    async fn compress(
        &self,
        request: CompressRequest,
        cancel: CancellationToken,
    ) -> Result<String> {
        // Queue behind the gate: waits out any retry-after window and
        // yields the in-flight slot to at most one background request.
        let permit = self.gate.acquire().await;

        tracing::debug!(
            "compress request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let send = async {
            let response = self
                .client
                .post(self.messages_url())
                .headers(self.headers()?)
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(self.handle_error(response).await);
            }

            let body: MessageResponse = response.json().await?;
            let text: String = body
                .content
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect::<Vec<_>>()
                .join("");

            if text.is_empty() {
                return Err(ApiError::EmptyResponse);
            }
            Ok(text)
        };

        tokio::select! {
            result = send => result,
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            _ = permit.preempt.cancelled() => Err(ApiError::Cancelled),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SsePayload {
    MessageStart {
        message: SseMessageInfo,
    },
    ContentBlockStart {},
    ContentBlockDelta {
        delta: SseDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: SseMessageDelta,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: SseErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct SseMessageInfo {
    model: String,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl SsePayload {
    fn into_event(self) -> Option<Result<StreamEvent>> {
        match self {
            SsePayload::MessageStart { message } => Some(Ok(StreamEvent::MessageStart {
                model: message.model,
                usage: message.usage,
            })),
            SsePayload::ContentBlockDelta { delta } => match delta.delta_type.as_str() {
                "text_delta" => Some(Ok(StreamEvent::TextDelta {
                    text: delta.text.unwrap_or_default(),
                })),
                "thinking_delta" => Some(Ok(StreamEvent::ThinkingDelta {
                    thinking: delta.thinking.unwrap_or_default(),
                })),
                // signature_delta and friends carry nothing we persist
                _ => None,
            },
            SsePayload::MessageDelta { delta, usage } => Some(Ok(StreamEvent::MessageDelta {
                stop_reason: delta.stop_reason,
                usage: usage.unwrap_or_default(),
            })),
            SsePayload::MessageStop => Some(Ok(StreamEvent::MessageStop)),
            SsePayload::Ping => Some(Ok(StreamEvent::Ping)),
            SsePayload::Error { error } => Some(Err(ApiError::Stream(format!(
                "{}: {}",
                error.error_type, error.message
            )))),
            SsePayload::ContentBlockStart {}
            | SsePayload::ContentBlockStop {}
            | SsePayload::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_normalizes_base_url() {
        let client = AnthropicClient::with_base_url(
            "test-key".to_string(),
            "http://localhost:8080/".to_string(),
        );
        assert_eq!(client.messages_url(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn parses_message_start_with_cache_counters() {
        let raw = r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet-4-6","usage":{"input_tokens":12,"output_tokens":0,"cache_read_input_tokens":50000,"cache_creation_input_tokens":0}}}"#;
        let payload: SsePayload = serde_json::from_str(raw).unwrap();
        match payload.into_event() {
            Some(Ok(StreamEvent::MessageStart { model, usage })) => {
                assert_eq!(model, "claude-sonnet-4-6");
                assert_eq!(usage.cache_read_input_tokens, 50_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parses_text_and_thinking_deltas() {
        let text = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        let payload: SsePayload = serde_json::from_str(text).unwrap();
        assert!(matches!(
            payload.into_event(),
            Some(Ok(StreamEvent::TextDelta { ref text })) if text == "Hello"
        ));

        let thinking = r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#;
        let payload: SsePayload = serde_json::from_str(thinking).unwrap();
        assert!(matches!(
            payload.into_event(),
            Some(Ok(StreamEvent::ThinkingDelta { ref thinking })) if thinking == "hmm"
        ));
    }

    #[test]
    fn parses_final_usage_from_message_delta() {
        let raw = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":321}}"#;
        let payload: SsePayload = serde_json::from_str(raw).unwrap();
        match payload.into_event() {
            Some(Ok(StreamEvent::MessageDelta { stop_reason, usage })) => {
                assert_eq!(stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(usage.output_tokens, 321);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_payloads_are_skipped() {
        let raw = r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#;
        let payload: SsePayload = serde_json::from_str(raw).unwrap();
        assert!(payload.into_event().is_none());
    }
}
