//! Facade exposed to the UI shell.
//!
//! Thin, store-backed services for projects, documents and conversations.
//! The shell (or the CLI) talks to these and to the orchestrator; nothing
//! else reaches into the store.

mod conversations;
mod projects;

pub use conversations::ConversationService;
pub use projects::ProjectService;

use crate::config::UserPaths;
use crate::db::Store;

/// Shared dependencies for the facade services.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Store,
    pub paths: UserPaths,
}

impl ServiceContext {
    pub fn new(store: Store, paths: UserPaths) -> Self {
        Self { store, paths }
    }
}
