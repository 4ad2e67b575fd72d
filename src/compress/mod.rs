//! Compression policy: when to fold old turns into the rolling summary,
//! which turns to fold, and the prompt that does the folding.
//!
//! Compression is a linguistic task over the transcript, so the project's
//! documents are deliberately left out of the prompt — injecting them into
//! every summariser call would multiply its cost for nothing. The
//! summariser gets the project name and an instruction to copy domain terms
//! verbatim instead.

use uuid::Uuid;

use crate::api::{ApiMessage, CompressRequest, Role, SystemBlock};
use crate::db::{Message, ProjectSettings};

/// Summaries are capped at this many tokens per cycle.
pub const SUMMARY_TOKEN_CAP: u32 = 500;

/// Output budget for the summariser call; headroom above the cap so the cap
/// instruction, not truncation, bounds the summary.
pub const SUMMARY_MAX_TOKENS: u32 = 1024;

/// When the accumulated summary outgrows this, it is recompressed against
/// an empty prior. Together with the per-cycle cap this keeps summary size
/// O(1) in conversation length.
pub const RECOMPRESS_THRESHOLD: i64 = 3000;

/// Compression always runs on the cheapest tier, regardless of the
/// project's default model.
pub const COMPRESSION_MODEL: &str = "claude-haiku-4-5";

/// One complete turn: a user message and its assistant response.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user: Message,
    pub assistant: Message,
}

/// The oldest complete turns to fold into the summary next.
#[derive(Debug, Clone)]
pub struct CompressionBatch {
    pub turns: Vec<Turn>,
    /// Last message covered by the batch; becomes the new cutoff.
    pub cutoff_msg_id: Uuid,
}

/// Complete user+assistant pairs among the uncompressed messages. A
/// trailing user message without its response does not count.
pub fn complete_turns(uncompressed: &[Message]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut pending_user: Option<&Message> = None;
    for message in uncompressed {
        match message.role {
            Role::User => pending_user = Some(message),
            Role::Assistant => {
                if let Some(user) = pending_user.take() {
                    turns.push(Turn {
                        user: user.clone(),
                        assistant: message.clone(),
                    });
                }
            }
        }
    }
    turns
}

/// True iff uncompressed complete turns strictly exceed the project
/// threshold.
pub fn should_compress(settings: &ProjectSettings, uncompressed: &[Message]) -> bool {
    complete_turns(uncompressed).len() > settings.compress_after_turns as usize
}

/// The oldest `compress_batch_size` complete turns, or `None` when there is
/// nothing to fold (compressing an empty batch is a no-op by contract).
pub fn select_batch(
    settings: &ProjectSettings,
    uncompressed: &[Message],
) -> Option<CompressionBatch> {
    let turns = complete_turns(uncompressed);
    if turns.is_empty() {
        return None;
    }
    let take = (settings.compress_batch_size as usize).min(turns.len());
    let batch: Vec<Turn> = turns.into_iter().take(take).collect();
    let cutoff_msg_id = batch.last()?.assistant.id;
    Some(CompressionBatch {
        turns: batch,
        cutoff_msg_id,
    })
}

fn summariser_system(project_name: &str) -> String {
    format!(
        "You are the conversation summariser for the project \"{}\". \
         You maintain a rolling summary that stands in for older turns of the \
         conversation. Reply with the updated summary text only — no preamble, \
         no commentary, no headings about what you did.",
        project_name
    )
}

fn transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str("User: ");
        out.push_str(&turn.user.content);
        out.push_str("\n\nAssistant: ");
        out.push_str(&turn.assistant.content);
        out.push_str("\n\n");
    }
    out
}

const RULES: &str = "Rules:\n\
    1. Preserve all key decisions and conclusions.\n\
    2. Preserve code signatures and core logic verbatim — do not paraphrase code.\n\
    3. Preserve domain terms, data points and numeric values verbatim.\n\
    4. Preserve user preferences and constraints.\n\
    5. Remove pleasantries, repetition and filler.\n\
    6. Keep the summary under 500 tokens.";

fn summariser_prompt(prior_summary: Option<&str>, turns: &[Turn]) -> String {
    let mut prompt = String::new();
    match prior_summary {
        Some(prior) => {
            prompt.push_str("Current summary of the conversation so far:\n\n");
            prompt.push_str(prior);
            prompt.push_str("\n\nFold the following newer turns into it:\n\n");
        }
        None => prompt.push_str("Summarise the following conversation turns:\n\n"),
    }
    prompt.push_str(&transcript(turns));
    prompt.push_str(RULES);
    prompt
}

/// Build the summariser request for one batch.
pub fn build_request(
    project_name: &str,
    prior_summary: Option<&str>,
    batch: &CompressionBatch,
) -> CompressRequest {
    CompressRequest {
        model: COMPRESSION_MODEL.to_string(),
        max_tokens: SUMMARY_MAX_TOKENS,
        system: vec![SystemBlock::plain(summariser_system(project_name))],
        messages: vec![ApiMessage::text(
            Role::User,
            summariser_prompt(prior_summary, batch.turns.as_slice()),
        )],
    }
}

/// Recompress an oversized summary against an empty prior, collapsing it
/// back under the per-cycle cap.
pub fn build_recompress_request(project_name: &str, summary: &str) -> CompressRequest {
    let prompt = format!(
        "The rolling summary below has grown too long. Rewrite it as a single \
         condensed summary.\n\n{}\n\n{}",
        summary, RULES
    );
    CompressRequest {
        model: COMPRESSION_MODEL.to_string(),
        max_tokens: SUMMARY_MAX_TOKENS,
        system: vec![SystemBlock::plain(summariser_system(project_name))],
        messages: vec![ApiMessage::text(Role::User, prompt)],
    }
}

pub fn needs_recompression(summary_token_count: i64) -> bool {
    summary_token_count > RECOMPRESS_THRESHOLD
}
