//! Top-level error type for the facade boundary.

use thiserror::Error;

use crate::api::ApiError;
use crate::context::ContextError;
use crate::db::StoreError;
use crate::orchestrator::OrchestratorError;

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
