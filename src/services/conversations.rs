//! Conversation management and transcript export.

use uuid::Uuid;

use super::ServiceContext;
use crate::api::Role;
use crate::db::{Conversation, StoreResult};

pub struct ConversationService {
    context: ServiceContext,
}

impl ConversationService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn create(
        &self,
        project_id: Uuid,
        title: String,
        model_override: Option<String>,
    ) -> StoreResult<Conversation> {
        // Fails early when the project is gone.
        self.context.store.get_project(project_id).await?;
        self.context
            .store
            .create_conversation(project_id, title, model_override)
            .await
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Conversation> {
        self.context.store.get_conversation(id).await
    }

    pub async fn list(&self, project_id: Uuid) -> StoreResult<Vec<Conversation>> {
        self.context.store.list_conversations(project_id).await
    }

    pub async fn rename(&self, id: Uuid, title: String) -> StoreResult<()> {
        self.context.store.rename_conversation(id, title).await
    }

    pub async fn set_archived(&self, id: Uuid, archived: bool) -> StoreResult<()> {
        self.context.store.set_conversation_archived(id, archived).await
    }

    pub async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.context.store.delete_conversation(id).await
    }

    /// Clear the rolling summary. The next turn is assembled from the full
    /// raw history, exactly like the first turn of a fresh conversation.
    ///
    /// Takes the conversation lock like every other writer of the summary
    /// fields, so a reset never interleaves with a summary commit.
    pub async fn reset_summary(&self, id: Uuid) -> StoreResult<()> {
        let lock = self.context.store.conversation_lock(id);
        let _guard = lock.lock().await;
        self.context.store.reset_summary(id).await
    }

    /// Markdown export of the raw transcript. Compression never touches
    /// raw messages, so this is byte-identical before and after any number
    /// of compression cycles.
    pub async fn export_transcript(&self, id: Uuid) -> StoreResult<String> {
        let conversation = self.context.store.get_conversation(id).await?;
        let messages = self.context.store.get_messages(id).await?;

        let mut out = format!("# {}\n", conversation.title);
        for message in &messages {
            let heading = match message.role {
                Role::User => "## User",
                Role::Assistant => "## Assistant",
            };
            out.push_str("\n");
            out.push_str(heading);
            out.push_str("\n\n");
            out.push_str(&message.content);
            out.push_str("\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserPaths;
    use crate::db::{Database, Message, ProjectSettings, Store};

    async fn service() -> (ConversationService, ServiceContext, Uuid) {
        let db = Database::connect_in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let context = ServiceContext::new(
            Store::new(db),
            UserPaths::new(dir.path().to_path_buf()),
        );
        let project = context
            .store
            .create_project(
                "P".to_string(),
                String::new(),
                "claude-sonnet-4-6".to_string(),
                ProjectSettings::default(),
            )
            .await
            .unwrap();
        (
            ConversationService::new(context.clone()),
            context,
            project.id,
        )
    }

    #[tokio::test]
    async fn export_renders_roles_in_order() {
        let (service, context, project_id) = service().await;
        let conversation = service
            .create(project_id, "Notes".to_string(), None)
            .await
            .unwrap();
        context
            .store
            .append_message(Message::user(conversation.id, "question"))
            .await
            .unwrap();
        context
            .store
            .append_message(Message::assistant(conversation.id, "answer"))
            .await
            .unwrap();

        let transcript = service.export_transcript(conversation.id).await.unwrap();
        assert!(transcript.starts_with("# Notes\n"));
        let user_pos = transcript.find("## User").unwrap();
        let assistant_pos = transcript.find("## Assistant").unwrap();
        assert!(user_pos < assistant_pos);
        assert!(transcript.contains("question"));
        assert!(transcript.contains("answer"));
    }

    #[tokio::test]
    async fn archive_round_trip() {
        let (service, _context, project_id) = service().await;
        let conversation = service
            .create(project_id, "C".to_string(), None)
            .await
            .unwrap();
        service.set_archived(conversation.id, true).await.unwrap();
        assert!(service.get(conversation.id).await.unwrap().is_archived);
        service.set_archived(conversation.id, false).await.unwrap();
        assert!(!service.get(conversation.id).await.unwrap().is_archived);
    }

    #[tokio::test]
    async fn model_override_is_persisted() {
        let (service, _context, project_id) = service().await;
        let conversation = service
            .create(
                project_id,
                "C".to_string(),
                Some("claude-opus-4-6".to_string()),
            )
            .await
            .unwrap();
        let loaded = service.get(conversation.id).await.unwrap();
        assert_eq!(loaded.model_override.as_deref(), Some("claude-opus-4-6"));
    }
}
