use thiserror::Error;

use crate::board::{AllocationError, BoardError};
use crate::events::StreamError;
use crate::external::{ErrorCategory, ErrorTranslator, ServiceError};
use crate::store::StoreError;

/// Errors surfaced to callers of the coordinator, board and endpoints.
///
/// A budget that runs out is not an error (the advance outcome reports
/// `done: false`), and a stale move is `MoveOutcome::Unchanged`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("could not allocate a work item id: {0}")]
    TransientCollision(AllocationError),

    #[error("{category}")]
    ExternalService { category: ErrorCategory },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("stage stream error: {0}")]
    Stream(#[from] StreamError),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        OrchestratorError::Validation(message.into())
    }

    /// Short text safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::ExternalService { category } => category.human_message().to_string(),
            OrchestratorError::Store(_) | OrchestratorError::Stream(_) => {
                "Internal storage error. Try again shortly.".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn from_service(error: ServiceError, translator: &ErrorTranslator) -> Self {
        match error {
            ServiceError::NotConfigured(message) => OrchestratorError::NotConfigured(message),
            other => OrchestratorError::ExternalService {
                category: translator.categorize_service_error(&other),
            },
        }
    }
}

impl From<BoardError> for OrchestratorError {
    fn from(error: BoardError) -> Self {
        match error {
            BoardError::UnknownColumn(_) | BoardError::ItemNotFound(_) | BoardError::EmptyTitle => {
                OrchestratorError::Validation(error.to_string())
            }
            BoardError::Allocation(AllocationError::Store(store)) => OrchestratorError::Store(store),
            BoardError::Allocation(exhausted) => OrchestratorError::TransientCollision(exhausted),
            BoardError::Store(store) => OrchestratorError::Store(store),
        }
    }
}
