//! Orchestrator events and errors.

use thiserror::Error;
use uuid::Uuid;

use crate::api::{ApiError, TokenUsage};
use crate::context::ContextError;
use crate::db::StoreError;

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Foreground turn lifecycle. Transitions:
/// Idle → Building → Streaming → Finalising → Idle; a build failure goes
/// straight back to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Building,
    Streaming,
    Finalising,
}

/// Events the UI shell subscribes to. The core pushes; the shell renders.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Phase {
        conversation_id: Uuid,
        phase: TurnPhase,
    },
    Chunk {
        conversation_id: Uuid,
        text: String,
    },
    Thinking {
        conversation_id: Uuid,
        text: String,
    },
    ResponseComplete {
        conversation_id: Uuid,
        message_id: Uuid,
        usage: Option<TokenUsage>,
        cost_usd: Option<f64>,
    },
    SummaryUpdated {
        conversation_id: Uuid,
        token_count: i64,
    },
    Warning {
        conversation_id: Uuid,
        message: String,
    },
}

pub type UiEventSender = tokio::sync::mpsc::UnboundedSender<UiEvent>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl OrchestratorError {
    /// Errors the user must act on; everything else is recovered locally.
    pub fn is_surfaced(&self) -> bool {
        match self {
            OrchestratorError::Context(ContextError::ContextTooLarge { .. }) => true,
            OrchestratorError::Api(ApiError::Auth { .. }) => true,
            OrchestratorError::Api(err) => err.is_transient(),
            OrchestratorError::Store(_) => true,
        }
    }
}
