//! Typed store operations over the pooled database.
//!
//! The store also hands out per-conversation locks: a summary update for a
//! conversation never reorders with a message append to the same
//! conversation because both writers hold the lock across their write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Row};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::database::{Database, StoreError, StoreResult};
use super::models::{ApiKey, Conversation, Document, Message, Project, ProjectSettings};
use crate::api::{Role, TokenUsage};

#[derive(Clone)]
pub struct Store {
    db: Database,
    locks: Arc<StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Lock serialising writes to one conversation. Message appends and
    /// summary updates both hold this across their store call.
    pub fn conversation_lock(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("conversation lock map poisoned");
        Arc::clone(locks.entry(id).or_default())
    }

    // ── Projects ─────────────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        name: String,
        system_prompt: String,
        default_model: String,
        settings: ProjectSettings,
    ) -> StoreResult<Project> {
        settings
            .validate()
            .map_err(StoreError::InvalidSettings)?;
        let project = Project {
            id: Uuid::new_v4(),
            name,
            system_prompt,
            default_model,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            settings,
        };
        let row = project.clone();
        self.db
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, system_prompt, default_model, created_at, updated_at, settings)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        row.id.to_string(),
                        row.name,
                        row.system_prompt,
                        row.default_model,
                        fmt_ts(row.created_at),
                        fmt_ts(row.updated_at),
                        serde_json::to_string(&row.settings)?,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> StoreResult<Project> {
        self.db
            .interact(move |conn| {
                conn.query_row(
                    "SELECT id, name, system_prompt, default_model, created_at, updated_at, settings
                     FROM projects WHERE id = ?1",
                    params![id.to_string()],
                    project_from_row,
                )
                .map_err(not_found("project"))
            })
            .await
    }

    pub async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.db
            .interact(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, system_prompt, default_model, created_at, updated_at, settings
                     FROM projects ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map([], project_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn update_project_settings(
        &self,
        id: Uuid,
        settings: ProjectSettings,
    ) -> StoreResult<()> {
        settings
            .validate()
            .map_err(StoreError::InvalidSettings)?;
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE projects SET settings = ?1, updated_at = ?2 WHERE id = ?3",
                    params![
                        serde_json::to_string(&settings)?,
                        fmt_ts(Utc::now()),
                        id.to_string()
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("project"));
                }
                Ok(())
            })
            .await
    }

    /// Editing the system prompt is a Layer-1 mutation: the next turn of
    /// every conversation in the project pays a fresh cache write.
    pub async fn set_project_system_prompt(&self, id: Uuid, prompt: String) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE projects SET system_prompt = ?1, updated_at = ?2 WHERE id = ?3",
                    params![prompt, fmt_ts(Utc::now()), id.to_string()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("project"));
                }
                Ok(())
            })
            .await
    }

    /// Delete a project with its conversations, documents, and messages.
    pub async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let tx = conn.transaction()?;
                let id = id.to_string();
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id IN
                     (SELECT id FROM conversations WHERE project_id = ?1)",
                    params![id],
                )?;
                tx.execute("DELETE FROM conversations WHERE project_id = ?1", params![id])?;
                tx.execute("DELETE FROM documents WHERE project_id = ?1", params![id])?;
                let changed = tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Err(StoreError::NotFound("project"));
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // ── Documents ────────────────────────────────────────────────────────

    pub async fn add_document(&self, document: Document) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, project_id, filename, extracted_text, token_count, file_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        document.id.to_string(),
                        document.project_id.to_string(),
                        document.filename,
                        document.extracted_text,
                        document.token_count,
                        document.file_type,
                        fmt_ts(document.created_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Documents in Layer-1 concatenation order. The ordering is a
    /// cache-correctness invariant, so ties break deterministically by id.
    pub async fn list_documents(&self, project_id: Uuid) -> StoreResult<Vec<Document>> {
        self.db
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, project_id, filename, extracted_text, token_count, file_type, created_at
                     FROM documents WHERE project_id = ?1 ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![project_id.to_string()], document_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn delete_document(&self, id: Uuid) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed =
                    conn.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
                if changed == 0 {
                    return Err(StoreError::NotFound("document"));
                }
                Ok(())
            })
            .await
    }

    // ── Conversations ────────────────────────────────────────────────────

    pub async fn create_conversation(
        &self,
        project_id: Uuid,
        title: String,
        model_override: Option<String>,
    ) -> StoreResult<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            project_id,
            title,
            model_override,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_archived: false,
            rolling_summary: None,
            last_compressed_msg_id: None,
            summary_token_count: None,
        };
        let row = conversation.clone();
        self.db
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, project_id, title, model_override, created_at, updated_at, is_archived)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                    params![
                        row.id.to_string(),
                        row.project_id.to_string(),
                        row.title,
                        row.model_override,
                        fmt_ts(row.created_at),
                        fmt_ts(row.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: Uuid) -> StoreResult<Conversation> {
        self.db
            .interact(move |conn| {
                conn.query_row(
                    "SELECT id, project_id, title, model_override, created_at, updated_at, is_archived,
                            rolling_summary, last_compressed_msg_id, summary_token_count
                     FROM conversations WHERE id = ?1",
                    params![id.to_string()],
                    conversation_from_row,
                )
                .map_err(not_found("conversation"))
            })
            .await
    }

    pub async fn list_conversations(&self, project_id: Uuid) -> StoreResult<Vec<Conversation>> {
        self.db
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, project_id, title, model_override, created_at, updated_at, is_archived,
                            rolling_summary, last_compressed_msg_id, summary_token_count
                     FROM conversations WHERE project_id = ?1 ORDER BY updated_at DESC, id",
                )?;
                let rows = stmt.query_map(params![project_id.to_string()], conversation_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn rename_conversation(&self, id: Uuid, title: String) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, fmt_ts(Utc::now()), id.to_string()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("conversation"));
                }
                Ok(())
            })
            .await
    }

    pub async fn set_conversation_archived(&self, id: Uuid, archived: bool) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE conversations SET is_archived = ?1, updated_at = ?2 WHERE id = ?3",
                    params![archived as i64, fmt_ts(Utc::now()), id.to_string()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("conversation"));
                }
                Ok(())
            })
            .await
    }

    pub async fn delete_conversation(&self, id: Uuid) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let tx = conn.transaction()?;
                let id = id.to_string();
                tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
                let changed = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Err(StoreError::NotFound("conversation"));
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Commit a compression result: atomic three-field write.
    ///
    /// Rejects with [`StoreError::StaleCutoff`] when the cutoff is not a
    /// message of this conversation, or does not advance past the current
    /// cutoff (a concurrent compression or reset won the race). The raw
    /// messages are never touched.
    pub async fn update_summary(
        &self,
        conversation_id: Uuid,
        summary: String,
        cutoff_msg_id: Uuid,
        token_count: i64,
    ) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let tx = conn.transaction()?;
                let conv_id = conversation_id.to_string();

                let cutoff: Option<(String, String)> = tx
                    .query_row(
                        "SELECT created_at, id FROM messages WHERE id = ?1 AND conversation_id = ?2",
                        params![cutoff_msg_id.to_string(), conv_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .ok();
                let cutoff = match cutoff {
                    Some(c) => c,
                    None => return Err(StoreError::StaleCutoff),
                };

                let previous: Option<String> = tx.query_row(
                    "SELECT last_compressed_msg_id FROM conversations WHERE id = ?1",
                    params![conv_id],
                    |row| row.get(0),
                )?;

                if let Some(prev_id) = previous {
                    let prev: (String, String) = tx.query_row(
                        "SELECT created_at, id FROM messages WHERE id = ?1",
                        params![prev_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    // Total order is (created_at, id); the new cutoff must
                    // strictly advance or the batch was already folded in.
                    if cutoff <= prev {
                        return Err(StoreError::StaleCutoff);
                    }
                }

                tx.execute(
                    "UPDATE conversations
                     SET rolling_summary = ?1, last_compressed_msg_id = ?2,
                         summary_token_count = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        summary,
                        cutoff_msg_id.to_string(),
                        token_count,
                        fmt_ts(Utc::now()),
                        conv_id
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Clear the three summary fields atomically. The next turn is built
    /// from the full raw history, exactly like a fresh conversation.
    pub async fn reset_summary(&self, conversation_id: Uuid) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE conversations
                     SET rolling_summary = NULL, last_compressed_msg_id = NULL,
                         summary_token_count = NULL, updated_at = ?1
                     WHERE id = ?2",
                    params![fmt_ts(Utc::now()), conversation_id.to_string()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("conversation"));
                }
                Ok(())
            })
            .await
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Single-statement insert; the store never exposes a partial row.
    pub async fn append_message(&self, message: Message) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, thinking, attachments,
                                           model_used, input_tokens, output_tokens, cache_read_tokens,
                                           cache_creation_tokens, cost_usd, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        message.id.to_string(),
                        message.conversation_id.to_string(),
                        message.role.as_str(),
                        message.content,
                        message.thinking,
                        serde_json::to_string(&message.attachments)?,
                        message.model_used,
                        message.input_tokens,
                        message.output_tokens,
                        message.cache_read_tokens,
                        message.cache_creation_tokens,
                        message.cost_usd,
                        fmt_ts(message.created_at),
                    ],
                )?;
                tx.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![fmt_ts(Utc::now()), message.conversation_id.to_string()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Backfill usage counters once a streaming response completes. The
    /// only mutation permitted on a written message.
    pub async fn update_message_usage(
        &self,
        message_id: Uuid,
        model_used: String,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    ) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let changed = conn.execute(
                    "UPDATE messages
                     SET model_used = ?1, input_tokens = ?2, output_tokens = ?3,
                         cache_read_tokens = ?4, cache_creation_tokens = ?5, cost_usd = ?6
                     WHERE id = ?7",
                    params![
                        model_used,
                        usage.input_tokens as i64,
                        usage.output_tokens as i64,
                        usage.cache_read_input_tokens as i64,
                        usage.cache_creation_input_tokens as i64,
                        cost_usd,
                        message_id.to_string(),
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound("message"));
                }
                Ok(())
            })
            .await
    }

    /// All messages of a conversation in total order (created_at, id).
    pub async fn get_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        self.db
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, thinking, attachments, model_used,
                            input_tokens, output_tokens, cache_read_tokens, cache_creation_tokens,
                            cost_usd, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![conversation_id.to_string()], message_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    // ── API keys ─────────────────────────────────────────────────────────

    pub async fn set_api_key(&self, name: String, key: String) -> StoreResult<()> {
        self.db
            .interact(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("UPDATE api_keys SET active = 0", [])?;
                tx.execute(
                    "INSERT INTO api_keys (id, name, key, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)
                     ON CONFLICT(name) DO UPDATE SET key = excluded.key, active = 1",
                    params![Uuid::new_v4().to_string(), name, key, fmt_ts(Utc::now())],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    pub async fn active_api_key(&self) -> StoreResult<Option<ApiKey>> {
        self.db
            .interact(|conn| {
                let key = conn
                    .query_row(
                        "SELECT id, name, key, active, created_at FROM api_keys WHERE active = 1
                         ORDER BY created_at DESC LIMIT 1",
                        [],
                        api_key_from_row,
                    )
                    .ok();
                Ok(key)
            })
            .await
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn conv_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conv_err(idx, e))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conv_err(idx, e)))
        .transpose()
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, e))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let settings_raw: String = row.get(6)?;
    Ok(Project {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        default_model: row.get(3)?,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
        settings: serde_json::from_str(&settings_raw).map_err(|e| conv_err(6, e))?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: get_uuid(row, 0)?,
        project_id: get_uuid(row, 1)?,
        filename: row.get(2)?,
        extracted_text: row.get(3)?,
        token_count: row.get(4)?,
        file_type: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: get_uuid(row, 0)?,
        project_id: get_uuid(row, 1)?,
        title: row.get(2)?,
        model_override: row.get(3)?,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
        is_archived: row.get::<_, i64>(6)? != 0,
        rolling_summary: row.get(7)?,
        last_compressed_msg_id: get_opt_uuid(row, 8)?,
        summary_token_count: row.get(9)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role_raw: String = row.get(2)?;
    let attachments_raw: String = row.get(5)?;
    Ok(Message {
        id: get_uuid(row, 0)?,
        conversation_id: get_uuid(row, 1)?,
        role: Role::parse(&role_raw).ok_or_else(|| {
            conv_err(2, std::io::Error::new(std::io::ErrorKind::InvalidData, role_raw))
        })?,
        content: row.get(3)?,
        thinking: row.get(4)?,
        attachments: serde_json::from_str(&attachments_raw).map_err(|e| conv_err(5, e))?,
        model_used: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        cache_read_tokens: row.get(9)?,
        cache_creation_tokens: row.get(10)?,
        cost_usd: row.get(11)?,
        created_at: get_ts(row, 12)?,
    })
}

fn api_key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        key: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_at: get_ts(row, 4)?,
    })
}

fn not_found(entity: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |err| match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(entity),
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_store() -> Store {
        let db = Database::connect_in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        Store::new(db)
    }

    async fn seed_conversation(store: &Store) -> (Project, Conversation) {
        let project = store
            .create_project(
                "Test Project".to_string(),
                "You are a Python expert.".to_string(),
                "claude-sonnet-4-6".to_string(),
                ProjectSettings::default(),
            )
            .await
            .unwrap();
        let conversation = store
            .create_conversation(project.id, "Test".to_string(), None)
            .await
            .unwrap();
        (project, conversation)
    }

    #[tokio::test]
    async fn project_round_trip() {
        let store = test_store().await;
        let created = store
            .create_project(
                "P".to_string(),
                "prompt".to_string(),
                "claude-sonnet-4-6".to_string(),
                ProjectSettings::default(),
            )
            .await
            .unwrap();
        let loaded = store.get_project(created.id).await.unwrap();
        assert_eq!(loaded.name, "P");
        assert_eq!(loaded.settings, ProjectSettings::default());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let store = test_store().await;
        let mut settings = ProjectSettings::default();
        settings.compress_batch_size = 99;
        let result = store
            .create_project(
                "P".to_string(),
                String::new(),
                "claude-sonnet-4-6".to_string(),
                settings,
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn messages_keep_total_order() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;

        for i in 0..4 {
            let mut msg = Message::user(conv.id, format!("m{}", i));
            // Force identical timestamps so ties break by id.
            msg.created_at = conv.created_at;
            store.append_message(msg).await.unwrap();
        }
        let messages = store.get_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 4);
        // Equal timestamps: ties must break by id, ascending.
        let returned: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
        let mut expected = returned.clone();
        expected.sort();
        assert_eq!(returned, expected);
    }

    #[tokio::test]
    async fn usage_backfill_is_the_only_mutation() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;
        let msg = Message::assistant(conv.id, "hello");
        let id = msg.id;
        store.append_message(msg).await.unwrap();

        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cache_read_input_tokens: 50,
            cache_creation_input_tokens: 5,
        };
        store
            .update_message_usage(id, "claude-sonnet-4-6".to_string(), usage, Some(0.001))
            .await
            .unwrap();

        let messages = store.get_messages(conv.id).await.unwrap();
        assert_eq!(messages[0].input_tokens, Some(100));
        assert_eq!(messages[0].cache_read_tokens, Some(50));
        assert_eq!(messages[0].cost_usd, Some(0.001));
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn update_summary_sets_three_fields() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;
        let m1 = Message::user(conv.id, "a");
        let m2 = Message::assistant(conv.id, "b");
        let cutoff = m2.id;
        store.append_message(m1).await.unwrap();
        store.append_message(m2).await.unwrap();

        store
            .update_summary(conv.id, "summary".to_string(), cutoff, 42)
            .await
            .unwrap();

        let loaded = store.get_conversation(conv.id).await.unwrap();
        assert_eq!(loaded.rolling_summary.as_deref(), Some("summary"));
        assert_eq!(loaded.last_compressed_msg_id, Some(cutoff));
        assert_eq!(loaded.summary_token_count, Some(42));
    }

    #[tokio::test]
    async fn update_summary_rejects_foreign_cutoff() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;
        let result = store
            .update_summary(conv.id, "s".to_string(), Uuid::new_v4(), 1)
            .await;
        assert!(matches!(result, Err(StoreError::StaleCutoff)));
    }

    #[tokio::test]
    async fn update_summary_rejects_non_advancing_cutoff() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;
        let m1 = Message::user(conv.id, "a");
        let m2 = Message::assistant(conv.id, "b");
        let first = m1.id;
        let second = m2.id;
        store.append_message(m1).await.unwrap();
        store.append_message(m2).await.unwrap();

        store
            .update_summary(conv.id, "s1".to_string(), second, 10)
            .await
            .unwrap();
        // A racing compression built against the old cutoff must lose.
        let result = store.update_summary(conv.id, "s2".to_string(), first, 10).await;
        assert!(matches!(result, Err(StoreError::StaleCutoff)));
        let loaded = store.get_conversation(conv.id).await.unwrap();
        assert_eq!(loaded.rolling_summary.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn reset_summary_clears_all_three_fields() {
        let store = test_store().await;
        let (_, conv) = seed_conversation(&store).await;
        let m1 = Message::user(conv.id, "a");
        let m2 = Message::assistant(conv.id, "b");
        let cutoff = m2.id;
        store.append_message(m1).await.unwrap();
        store.append_message(m2).await.unwrap();
        store
            .update_summary(conv.id, "s".to_string(), cutoff, 10)
            .await
            .unwrap();

        store.reset_summary(conv.id).await.unwrap();
        let loaded = store.get_conversation(conv.id).await.unwrap();
        assert!(loaded.rolling_summary.is_none());
        assert!(loaded.last_compressed_msg_id.is_none());
        assert!(loaded.summary_token_count.is_none());
    }

    #[tokio::test]
    async fn delete_project_cascades() {
        let store = test_store().await;
        let (project, conv) = seed_conversation(&store).await;
        store
            .append_message(Message::user(conv.id, "hi"))
            .await
            .unwrap();

        store.delete_project(project.id).await.unwrap();
        assert!(matches!(
            store.get_conversation(conv.id).await,
            Err(StoreError::NotFound(_))
        ));
        let messages = store.get_messages(conv.id).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn active_api_key_follows_latest_set() {
        let store = test_store().await;
        assert!(store.active_api_key().await.unwrap().is_none());
        store
            .set_api_key("default".to_string(), "sk-1".to_string())
            .await
            .unwrap();
        store
            .set_api_key("work".to_string(), "sk-2".to_string())
            .await
            .unwrap();
        let active = store.active_api_key().await.unwrap().unwrap();
        assert_eq!(active.key, "sk-2");
    }
}
