//! Transport abstraction over the provider API.
//!
//! The orchestrator and compression worker talk to this trait; production
//! code uses [`AnthropicClient`](super::AnthropicClient), tests substitute
//! mocks.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::error::Result;
use super::types::{ChatRequest, CompressRequest, StreamEvent};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Open a streaming chat completion.
    ///
    /// Transient failures are retried with backoff while establishing the
    /// stream; once any event has been emitted no retry is attempted. The
    /// cancellation token is honoured on chunk boundaries: the stream simply
    /// ends, and the caller commits whatever text has arrived.
    async fn chat(&self, request: ChatRequest, cancel: CancellationToken) -> Result<ChatStream>;

    /// Run a non-streaming summarisation request and return the summary
    /// text. Never retried; must yield to foreground traffic under rate
    /// limits (see [`RateGate`](super::RateGate)).
    async fn compress(
        &self,
        request: CompressRequest,
        cancel: CancellationToken,
    ) -> Result<String>;
}
