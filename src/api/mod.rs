//! Provider API transport layer.
//!
//! Foreground chat streams through [`ApiClient::chat`]; the background
//! summariser goes through [`ApiClient::compress`] and must yield to
//! foreground traffic under rate limits.

pub mod anthropic;
mod client;
pub mod error;
pub mod rate_gate;
pub mod retry;
pub mod types;

pub use anthropic::{AnthropicClient, DEFAULT_BASE_URL};
pub use client::{ApiClient, ChatStream};
pub use error::{ApiError, Result};
pub use rate_gate::{GatePermit, RateGate};
pub use types::*;
