//! Persistent row types.
//!
//! The store exclusively owns these rows; everything else works on value
//! copies. Messages are append-only: after insertion the only permitted
//! mutation is backfilling usage counters when a stream completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{CacheTtl, Role};

/// Recognised per-project options. Stored as a JSON column; ranges are
/// validated on write so a bad UI value surfaces instead of silently
/// clamping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSettings {
    #[serde(default)]
    pub cache_ttl: CacheTtl,

    /// Compression triggers once uncompressed turns exceed this. A turn is
    /// one user message plus its assistant response.
    #[serde(default = "default_compress_after_turns")]
    pub compress_after_turns: u32,

    /// Oldest complete turns folded into each compression.
    #[serde(default = "default_compress_batch_size")]
    pub compress_batch_size: u32,

    #[serde(default)]
    pub thinking_enabled: bool,

    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
}

fn default_compress_after_turns() -> u32 {
    10
}

fn default_compress_batch_size() -> u32 {
    5
}

fn default_thinking_budget() -> u32 {
    4096
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            cache_ttl: CacheTtl::FiveMinutes,
            compress_after_turns: default_compress_after_turns(),
            compress_batch_size: default_compress_batch_size(),
            thinking_enabled: false,
            thinking_budget: default_thinking_budget(),
        }
    }
}

impl ProjectSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(5..=30).contains(&self.compress_after_turns) {
            return Err(format!(
                "compress_after_turns must be in [5, 30], got {}",
                self.compress_after_turns
            ));
        }
        if !(3..=10).contains(&self.compress_batch_size) {
            return Err(format!(
                "compress_batch_size must be in [3, 10], got {}",
                self.compress_batch_size
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub default_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settings: ProjectSettings,
}

/// An uploaded document. `extracted_text` is written once at upload and
/// immutable thereafter. Documents concatenate into Layer 1 in `created_at`
/// order; reordering them would change the cached byte prefix.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub extracted_text: String,
    pub token_count: i64,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub model_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_archived: bool,
    /// Lossy accumulated narrative of compressed turns. Mutated only by the
    /// compression worker (or cleared by a user reset).
    pub rolling_summary: Option<String>,
    /// Newest message covered by the rolling summary. Always older than
    /// every uncompressed message.
    pub last_compressed_msg_id: Option<Uuid>,
    pub summary_token_count: Option<i64>,
}

impl Conversation {
    /// Model used for this conversation's turns.
    pub fn model<'a>(&'a self, project: &'a Project) -> &'a str {
        self.model_override
            .as_deref()
            .unwrap_or(&project.default_model)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub attachments: Vec<String>,
    pub model_used: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_creation_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role: Role::User,
            content: content.into(),
            thinking: None,
            attachments: Vec::new(),
            model_used: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            cost_usd: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(conversation_id, content)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_are_in_range() {
        let settings = ProjectSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.compress_after_turns, 10);
        assert_eq!(settings.compress_batch_size, 5);
        assert_eq!(settings.cache_ttl, CacheTtl::FiveMinutes);
    }

    #[test]
    fn settings_ranges_are_enforced() {
        let mut settings = ProjectSettings::default();
        settings.compress_after_turns = 4;
        assert!(settings.validate().is_err());
        settings.compress_after_turns = 30;
        assert!(settings.validate().is_ok());
        settings.compress_batch_size = 11;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_deserialize_with_partial_fields() {
        let settings: ProjectSettings =
            serde_json::from_str(r#"{"cache_ttl":"1h","compress_after_turns":12}"#).unwrap();
        assert_eq!(settings.cache_ttl, CacheTtl::OneHour);
        assert_eq!(settings.compress_after_turns, 12);
        assert_eq!(settings.compress_batch_size, 5);
    }

    #[test]
    fn conversation_model_override_wins() {
        let project = Project {
            id: Uuid::new_v4(),
            name: "p".to_string(),
            system_prompt: String::new(),
            default_model: "claude-sonnet-4-6".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            settings: ProjectSettings::default(),
        };
        let mut conv = Conversation {
            id: Uuid::new_v4(),
            project_id: project.id,
            title: "c".to_string(),
            model_override: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_archived: false,
            rolling_summary: None,
            last_compressed_msg_id: None,
            summary_token_count: None,
        };
        assert_eq!(conv.model(&project), "claude-sonnet-4-6");
        conv.model_override = Some("claude-opus-4-6".to_string());
        assert_eq!(conv.model(&project), "claude-opus-4-6");
    }
}
