//! Local token counting.
//!
//! Used for context-budget estimates and summary token counts. Uses
//! tiktoken cl100k_base — close to but not identical to the provider's
//! tokenizer, which is why estimates only promise a bounded overshoot and
//! the store always records the provider's own usage counters.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

static BPE: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base tokenizer failed to load"));

/// Tokens added per message for role/formatting framing.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 8;

pub fn count_tokens(text: &str) -> usize {
    BPE.encode_with_special_tokens(text).len()
}

/// Token count for one chat message including framing overhead.
pub fn count_message_tokens(content: &str) -> usize {
    count_tokens(content) + MESSAGE_OVERHEAD_TOKENS
}
