//! Project and document management.

use chrono::Utc;
use uuid::Uuid;

use super::ServiceContext;
use crate::db::{Document, Project, ProjectSettings, StoreError, StoreResult};
use crate::tokenizer;

pub struct ProjectService {
    context: ServiceContext,
}

impl ProjectService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn create(
        &self,
        name: String,
        system_prompt: String,
        default_model: String,
    ) -> StoreResult<Project> {
        self.context
            .store
            .create_project(name, system_prompt, default_model, ProjectSettings::default())
            .await
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Project> {
        self.context.store.get_project(id).await
    }

    pub async fn list(&self) -> StoreResult<Vec<Project>> {
        self.context.store.list_projects().await
    }

    pub async fn update_settings(&self, id: Uuid, settings: ProjectSettings) -> StoreResult<()> {
        self.context.store.update_project_settings(id, settings).await
    }

    /// Replace the project's system prompt. Invalidates the Layer-1 cache
    /// of every conversation in the project; the next turn of each pays a
    /// fresh cache write.
    pub async fn set_system_prompt(&self, id: Uuid, prompt: String) -> StoreResult<()> {
        self.context.store.set_project_system_prompt(id, prompt).await
    }

    pub async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.context.store.delete_project(id).await
    }

    /// Register an uploaded document. Text extraction happens upstream (a
    /// library concern); the extracted text is tokenised once here and is
    /// immutable afterwards. The original file is kept under the user data
    /// directory for re-export.
    pub async fn add_document(
        &self,
        project_id: Uuid,
        filename: String,
        file_type: String,
        extracted_text: String,
    ) -> StoreResult<Document> {
        // Fails early when the project is gone.
        self.context.store.get_project(project_id).await?;

        let document = Document {
            id: Uuid::new_v4(),
            project_id,
            filename: filename.clone(),
            token_count: tokenizer::count_tokens(&extracted_text) as i64,
            extracted_text,
            file_type,
            created_at: Utc::now(),
        };

        let dir = self.context.paths.documents_dir(project_id);
        if let Err(e) = std::fs::create_dir_all(&dir).and_then(|_| {
            std::fs::write(
                dir.join(format!("{}_{}", document.id, filename)),
                &document.extracted_text,
            )
        }) {
            tracing::warn!("failed to persist document copy: {}", e);
        }

        self.context.store.add_document(document.clone()).await?;
        Ok(document)
    }

    pub async fn list_documents(&self, project_id: Uuid) -> StoreResult<Vec<Document>> {
        self.context.store.list_documents(project_id).await
    }

    /// Delete a document mid-project. This mutates Layer 1: the next turn
    /// of every conversation pays a fresh cache-creation cost. The caller
    /// gets a warning string to surface; the delete is never blocked.
    pub async fn delete_document(&self, id: Uuid) -> StoreResult<String> {
        self.context.store.delete_document(id).await?;
        Ok(
            "Deleting a document invalidates the cached context; the next message in each \
             conversation of this project will re-create the cache at full input price."
                .to_string(),
        )
    }
}
