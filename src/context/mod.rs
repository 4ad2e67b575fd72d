//! Four-layer request assembler.
//!
//! Every decision here is a cache-correctness decision. The provider caches
//! on the full byte prefix up to each cache-control marker, so Layer 1
//! (system prompt + documents) must serialize to identical bytes on every
//! turn while its inputs are unchanged, and Layer 2 (the rolling summary)
//! must sit after it, marked only when large enough for the provider to
//! actually cache it.
//!
//! Layer order: system+documents, rolling summary, recent messages, the new
//! user turn. Layers 1 and 2 are cache breakpoints; 3 and 4 are uncached.

use thiserror::Error;
use uuid::Uuid;

use crate::api::{
    ApiMessage, ChatRequest, ContentBlock, ContextManagement, MessageContent, Role, SystemBlock,
    ThinkingConfig,
};
use crate::db::{Conversation, Document, Message, Project};
use crate::pricing::PricingTable;
use crate::tokenizer;

/// Output tokens reserved out of the context window.
pub const RESERVED_OUTPUT_TOKENS: u32 = 8192;

/// Server-side compaction trigger: 80% of the 200K context window. An
/// orthogonal safety net — client-side compression keeps requests far below
/// this.
pub const COMPACTION_TRIGGER_TOKENS: u64 = 160_000;

/// The provider silently refuses to cache blocks below this size; marking a
/// smaller block is a no-op that still bills full input pricing.
pub const MIN_CACHED_SUMMARY_TOKENS: i64 = 1024;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(
        "context too large: {baseline} tokens of system, documents and summary exceed the {budget}-token budget"
    )]
    ContextTooLarge { baseline: usize, budget: usize },
}

/// An assembled request plus the token accounting behind it.
#[derive(Debug)]
pub struct BuiltContext {
    pub request: ChatRequest,
    /// Local-tokeniser estimate of total input tokens.
    pub estimated_tokens: usize,
    /// Portion of the estimate covered by cache markers.
    pub estimated_cached_tokens: usize,
    /// Layer-3 messages dropped by budget fitting.
    pub dropped_messages: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Estimate {
    pub estimated_input_tokens: usize,
    pub estimated_cached_tokens: usize,
    pub estimated_cost_usd: f64,
}

/// Layer-1 byte sequence: system prompt and document texts joined with
/// exactly one blank line, documents in `created_at` order. Deterministic
/// by construction — no maps, no reformatting.
pub fn layer_one_text(system_prompt: &str, documents: &[Document]) -> String {
    let mut text = String::from(system_prompt);
    for doc in documents {
        text.push_str("\n\n");
        text.push_str(&doc.extracted_text);
    }
    text
}

fn summary_block_text(summary: &str) -> String {
    format!("<conversation_summary>\n{}\n</conversation_summary>", summary)
}

/// Messages strictly after the compression cutoff, in total order.
pub fn uncompressed_messages<'a>(
    messages: &'a [Message],
    cutoff: Option<Uuid>,
) -> &'a [Message] {
    match cutoff {
        None => messages,
        Some(cutoff_id) => match messages.iter().position(|m| m.id == cutoff_id) {
            Some(pos) => &messages[pos + 1..],
            // A cutoff pointing at no message means the summary covers
            // nothing we can see; fall back to the full history.
            None => messages,
        },
    }
}

fn message_tokens(message: &Message) -> usize {
    let mut tokens = tokenizer::count_message_tokens(&message.content);
    if let Some(thinking) = &message.thinking {
        tokens += tokenizer::count_tokens(thinking);
    }
    tokens
}

fn to_api_message(message: &Message) -> ApiMessage {
    match &message.thinking {
        // Thinking survives replay as a tagged text block; the provider
        // rejects bare thinking blocks without their signatures.
        Some(thinking) => ApiMessage {
            role: message.role,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: format!("<thinking>\n{}\n</thinking>", thinking),
                },
                ContentBlock::Text {
                    text: message.content.clone(),
                },
            ]),
        },
        None => ApiMessage::text(message.role, message.content.clone()),
    }
}

/// Assemble the four layers for one turn.
///
/// `messages` is the conversation's full message history in total order;
/// the new user turn is `user_text` and must not be in `messages` yet.
pub fn build(
    project: &Project,
    documents: &[Document],
    conversation: &Conversation,
    messages: &[Message],
    user_text: &str,
    pricing: &PricingTable,
) -> Result<BuiltContext, ContextError> {
    let model = conversation.model(project);
    let window = pricing.context_window(model) as usize;
    let budget = window.saturating_sub(RESERVED_OUTPUT_TOKENS as usize);
    let ttl = project.settings.cache_ttl;

    // Layer 1 — system + documents, always cache-marked.
    let layer_one = layer_one_text(&project.system_prompt, documents);
    let layer_one_tokens = tokenizer::count_tokens(&layer_one);
    let mut system = vec![SystemBlock::cached(layer_one, ttl)];

    // Layer 2 — rolling summary, cache-marked only at >= 1024 tokens.
    let mut layer_two_tokens = 0usize;
    let mut layer_two_cached = false;
    if let Some(summary) = &conversation.rolling_summary {
        let text = summary_block_text(summary);
        layer_two_tokens = tokenizer::count_tokens(&text);
        layer_two_cached =
            conversation.summary_token_count.unwrap_or(0) >= MIN_CACHED_SUMMARY_TOKENS;
        system.push(if layer_two_cached {
            SystemBlock::cached(text, ttl)
        } else {
            SystemBlock::plain(text)
        });
    }

    // Layer 4 is part of the irreducible baseline.
    let user_tokens = tokenizer::count_message_tokens(user_text);
    let baseline = layer_one_tokens + layer_two_tokens + user_tokens;
    if baseline > budget {
        return Err(ContextError::ContextTooLarge { baseline, budget });
    }

    // Layer 3 — messages after the cutoff, oldest pairs dropped from the
    // front until the request fits.
    let recent = uncompressed_messages(messages, conversation.last_compressed_msg_id);
    let token_counts: Vec<usize> = recent.iter().map(message_tokens).collect();
    let mut layer_three_tokens: usize = token_counts.iter().sum();
    let mut keep_from = 0usize;
    while keep_from < recent.len() && baseline + layer_three_tokens > budget {
        // Drop a user+assistant pair where the history is well-formed, a
        // single message where it is not.
        let mut drop = 1;
        if recent[keep_from].role == Role::User
            && recent.get(keep_from + 1).map(|m| m.role) == Some(Role::Assistant)
        {
            drop = 2;
        }
        for _ in 0..drop {
            layer_three_tokens -= token_counts[keep_from];
            keep_from += 1;
        }
    }
    let kept = &recent[keep_from..];

    if keep_from > 0 {
        tracing::info!(
            "context budget: dropped {} of {} recent messages ({} tokens kept, budget {})",
            keep_from,
            recent.len(),
            layer_three_tokens,
            budget
        );
    }

    let mut api_messages: Vec<ApiMessage> = kept.iter().map(to_api_message).collect();
    api_messages.push(ApiMessage::text(Role::User, user_text.to_string()));

    let thinking = if project.settings.thinking_enabled {
        Some(ThinkingConfig::enabled(project.settings.thinking_budget))
    } else {
        None
    };

    let request = ChatRequest {
        model: model.to_string(),
        max_tokens: RESERVED_OUTPUT_TOKENS,
        system,
        messages: api_messages,
        thinking,
        context_management: Some(ContextManagement::compaction(COMPACTION_TRIGGER_TOKENS)),
        stream: true,
    };

    let estimated_cached_tokens =
        layer_one_tokens + if layer_two_cached { layer_two_tokens } else { 0 };

    Ok(BuiltContext {
        request,
        estimated_tokens: baseline + layer_three_tokens,
        estimated_cached_tokens,
        dropped_messages: keep_from,
    })
}

/// Pre-send estimate for display. Shares `build` rather than approximating,
/// and prices the input assuming the cached prefix is read — the
/// steady-state case the ±15% contract is defined against.
pub fn estimate(
    project: &Project,
    documents: &[Document],
    conversation: &Conversation,
    messages: &[Message],
    user_text: &str,
    pricing: &PricingTable,
) -> Result<Estimate, ContextError> {
    let built = build(project, documents, conversation, messages, user_text, pricing)?;
    let model = conversation.model(project);
    let cached = built.estimated_cached_tokens as u64;
    let uncached = built.estimated_tokens.saturating_sub(built.estimated_cached_tokens) as u64;
    Ok(Estimate {
        estimated_input_tokens: built.estimated_tokens,
        estimated_cached_tokens: built.estimated_cached_tokens,
        estimated_cost_usd: pricing.estimate_input_cost(model, cached, uncached),
    })
}
