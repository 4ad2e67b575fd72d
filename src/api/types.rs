//! Anthropic Messages API wire types.
//!
//! Request serialization is byte-order stable: struct field order is the
//! serialization order, so the same inputs always produce the same JSON.
//! The prompt cache keys on the request prefix, which makes this a
//! correctness property rather than a cosmetic one.

use serde::{Deserialize, Serialize};

/// Cache TTL for ephemeral prompt-cache markers.
///
/// Also the value of the `cache_ttl` project setting, so it serializes as
/// the provider-facing strings `"5m"` / `"1h"` in both places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CacheTtl {
    #[default]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl CacheTtl {
    /// Cache-write price multiplier relative to base input pricing.
    pub fn write_multiplier(self) -> f64 {
        match self {
            CacheTtl::FiveMinutes => 1.25,
            CacheTtl::OneHour => 2.0,
        }
    }
}

/// Cache control marker for prompt caching.
///
/// `ttl` is only present on the wire for the 1-hour variant; the provider
/// default is 5 minutes.
#[derive(Debug, Clone, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    cache_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<&'static str>,
}

impl CacheControl {
    pub fn ephemeral(ttl: CacheTtl) -> Self {
        Self {
            cache_type: "ephemeral",
            ttl: match ttl {
                CacheTtl::FiveMinutes => None,
                CacheTtl::OneHour => Some("1h"),
            },
        }
    }
}

/// System message block with optional cache control.
#[derive(Debug, Clone, Serialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            block_type: "text",
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn cached(text: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            block_type: "text",
            text: text.into(),
            cache_control: Some(CacheControl::ephemeral(ttl)),
        }
    }
}

/// Message role. Doubles as the persisted role string in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ApiMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Extended-thinking configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    config_type: &'static str,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            config_type: "enabled",
            budget_tokens,
        }
    }
}

/// Server-side compaction safety net.
///
/// Client-side compression should keep requests far below the trigger; this
/// rides along on every chat request as an orthogonal backstop.
#[derive(Debug, Clone, Serialize)]
pub struct ContextManagement {
    pub edits: Vec<CompactEdit>,
}

impl ContextManagement {
    pub fn compaction(trigger_tokens: u64) -> Self {
        Self {
            edits: vec![CompactEdit {
                edit_type: "compact_20260112",
                trigger: InputTokensTrigger {
                    trigger_type: "input_tokens",
                    value: trigger_tokens,
                },
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactEdit {
    #[serde(rename = "type")]
    edit_type: &'static str,
    pub trigger: InputTokensTrigger,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputTokensTrigger {
    #[serde(rename = "type")]
    trigger_type: &'static str,
    pub value: u64,
}

/// A fully assembled streaming chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_management: Option<ContextManagement>,
    pub stream: bool,
}

/// A non-streaming summarisation request.
#[derive(Debug, Clone, Serialize)]
pub struct CompressRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ApiMessage>,
}

/// Token usage counters as reported by the provider.
///
/// Billing always uses these numbers; local tokeniser output is only for
/// estimates and never written to the store.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl TokenUsage {
    /// Merge a later usage report into this one, keeping the larger value of
    /// each counter. Providers may send a zeroed usage block before the real
    /// one arrives on the final delta.
    pub fn merge_max(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .max(other.cache_read_input_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .max(other.cache_creation_input_tokens);
    }
}

/// Events emitted by a streaming chat call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart {
        model: String,
        usage: TokenUsage,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    MessageDelta {
        stop_reason: Option<String>,
        usage: TokenUsage,
    },
    MessageStop,
    Ping,
}
