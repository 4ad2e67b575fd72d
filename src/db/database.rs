//! Database connection management and schema migrations.
//!
//! SQLite behind a deadpool pool; migrations are forward-only and
//! idempotent. The schema version lives in SQLite's `user_version` pragma,
//! mirrored into the single-row `schema_meta` table for external
//! inspection.

use std::path::Path;

use deadpool_sqlite::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};
use thiserror::Error;

use crate::tokenizer;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("compression cutoff is stale")]
    StaleCutoff,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const SCHEMA_V1: &str = "
CREATE TABLE projects (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    system_prompt TEXT NOT NULL DEFAULT '',
    default_model TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    settings      TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE documents (
    id             TEXT PRIMARY KEY,
    project_id     TEXT NOT NULL REFERENCES projects(id),
    filename       TEXT NOT NULL,
    extracted_text TEXT NOT NULL,
    token_count    INTEGER NOT NULL,
    file_type      TEXT NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX idx_documents_project ON documents(project_id, created_at, id);

CREATE TABLE conversations (
    id             TEXT PRIMARY KEY,
    project_id     TEXT NOT NULL REFERENCES projects(id),
    title          TEXT NOT NULL,
    model_override TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    is_archived    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX idx_conversations_project ON conversations(project_id, updated_at);

CREATE TABLE messages (
    id                    TEXT PRIMARY KEY,
    conversation_id       TEXT NOT NULL REFERENCES conversations(id),
    role                  TEXT NOT NULL,
    content               TEXT NOT NULL,
    thinking              TEXT,
    attachments           TEXT NOT NULL DEFAULT '[]',
    model_used            TEXT,
    input_tokens          INTEGER,
    output_tokens         INTEGER,
    cache_read_tokens     INTEGER,
    cache_creation_tokens INTEGER,
    cost_usd              REAL,
    created_at            TEXT NOT NULL
);
CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at, id);

CREATE TABLE api_keys (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    key        TEXT NOT NULL,
    active     INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE schema_meta (
    id      INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
INSERT INTO schema_meta (id, version) VALUES (1, 1);
";

/// v2: rolling-summary columns on conversations. Older databases predate
/// incremental compression entirely.
const SCHEMA_V2: &str = "
ALTER TABLE conversations ADD COLUMN rolling_summary TEXT;
ALTER TABLE conversations ADD COLUMN last_compressed_msg_id TEXT;
ALTER TABLE conversations ADD COLUMN summary_token_count INTEGER;
UPDATE schema_meta SET version = 2;
";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA_V1), M::up(SCHEMA_V2)])
}

#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Pool(format!("failed to create data dir: {e}")))?;
        }
        let pool = PoolSettings::new(path)
            .create_pool(Runtime::Tokio1)
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        tracing::info!("database open at {}", path.display());
        Ok(Self { pool })
    }

    /// In-memory database for tests. The pool is pinned to one connection:
    /// each `:memory:` connection is otherwise its own empty database.
    pub async fn connect_in_memory() -> StoreResult<Self> {
        let mut settings = PoolSettings::new(":memory:");
        settings.pool = Some(PoolConfig::new(1));
        let pool = settings
            .create_pool(Runtime::Tokio1)
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Apply pending migrations, then backfill summary token counts for
    /// rows written before the counter existed. Re-running is a no-op.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.interact(|conn| {
            migrations()
                .to_latest(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            backfill_summary_token_counts(conn)?;
            Ok(())
        })
        .await
    }

    /// Run a closure against a pooled connection.
    pub(crate) async fn interact<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        conn.interact(f)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?
    }
}

fn backfill_summary_token_counts(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;
    let pending: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, rolling_summary FROM conversations
             WHERE rolling_summary IS NOT NULL AND summary_token_count IS NULL",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    for (id, summary) in &pending {
        let count = tokenizer::count_tokens(summary) as i64;
        tx.execute(
            "UPDATE conversations SET summary_token_count = ?1 WHERE id = ?2",
            rusqlite::params![count, id],
        )?;
    }
    if !pending.is_empty() {
        tracing::info!("backfilled summary token counts for {} rows", pending.len());
    }
    tx.commit()?;
    Ok(())
}
