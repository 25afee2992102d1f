// Content store for work items and run records.
// Column moves and run status changes are compare-and-swap inside the store;
// nothing holds a lock across a call to the external service.

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::board::{ColumnId, ItemId, WorkItem};
use crate::runs::{AgentKind, RunId, RunPatch, RunRecord, RunStatus};

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The origin key is already taken; retrying under another id cannot help.
    #[error("a work item with origin '{0}' already exists")]
    DuplicateOrigin(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("illegal run transition {from} -> {to}")]
    IllegalTransition { from: RunStatus, to: RunStatus },

    #[error("external job id is already set to '{existing}'")]
    ImmutableField { existing: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Collision-class errors are the only ones the id allocator retries.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    pub fn item_not_found(id: &ItemId) -> Self {
        StoreError::NotFound {
            entity: "work item",
            id: id.to_string(),
        }
    }

    pub fn run_not_found(id: &RunId) -> Self {
        StoreError::NotFound {
            entity: "run",
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Insert a new item at the end of its column. Fails with
    /// `UniqueViolation` when the id is taken and `DuplicateOrigin` when the
    /// origin is.
    async fn insert_item(&self, item: WorkItem) -> Result<WorkItem, StoreError>;

    async fn get_item(&self, id: &ItemId) -> Result<Option<WorkItem>, StoreError>;

    async fn list_items(&self) -> Result<Vec<WorkItem>, StoreError>;

    async fn item_ids(&self) -> Result<Vec<ItemId>, StoreError> {
        Ok(self.list_items().await?.into_iter().map(|i| i.id).collect())
    }

    /// Move `id` to `target` only if it is still in `expected`. The new
    /// position is the target column's item count at write time. Returns
    /// `None` when the precondition no longer holds.
    async fn move_if_in_column(
        &self,
        id: &ItemId,
        expected: &ColumnId,
        target: &ColumnId,
        moved_at: DateTime<Utc>,
    ) -> Result<Option<WorkItem>, StoreError>;

    /// Replace the body only if it still equals `expected`. Returns `false`
    /// when another writer changed it first.
    async fn update_body_if(
        &self,
        id: &ItemId,
        expected: &str,
        body: &str,
    ) -> Result<bool, StoreError>;

    async fn find_by_origin(&self, origin: &str) -> Result<Option<WorkItem>, StoreError>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fails with `UniqueViolation` when the id is taken or the
    /// (item, kind) pair already has a non-terminal run.
    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    async fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// The non-terminal run for this (item, kind) pair, if any.
    async fn find_active_run(
        &self,
        item: &ItemId,
        kind: AgentKind,
    ) -> Result<Option<RunRecord>, StoreError>;

    async fn runs_for_item(&self, item: &ItemId) -> Result<Vec<RunRecord>, StoreError>;

    /// Keyed single-row update guarded on the current status. Returns `None`
    /// when the stored status is no longer `expected`.
    async fn update_run(
        &self,
        id: &RunId,
        expected: RunStatus,
        patch: &RunPatch,
    ) -> Result<Option<RunRecord>, StoreError>;
}

/// Everything the coordinator needs from persistence.
pub trait ContentStore: WorkItemStore + RunStore {}

impl<T: WorkItemStore + RunStore> ContentStore for T {}

pub type SharedStore = std::sync::Arc<dyn ContentStore>;

/// Validate a patch against the stored record. `Ok(false)` means the status
/// precondition failed and nothing should be written.
pub(crate) fn check_run_patch(
    current: &RunRecord,
    expected: RunStatus,
    patch: &RunPatch,
) -> Result<bool, StoreError> {
    if current.status != expected {
        return Ok(false);
    }
    if let Some(next) = patch.status {
        if !current.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                from: current.status,
                to: next,
            });
        }
    }
    if let (Some(existing), Some(incoming)) = (&current.external_job_id, &patch.external_job_id) {
        if existing != incoming {
            return Err(StoreError::ImmutableField {
                existing: existing.to_string(),
            });
        }
    }
    Ok(true)
}
