use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::allocator::{AllocationError, IdAllocator};
use super::layout::BoardLayout;
use super::types::{ColumnId, ItemId, NewWorkItem, Trigger, WorkItem};
use crate::store::{StoreError, WorkItemStore};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("unknown column '{0}'")]
    UnknownColumn(ColumnId),

    #[error("work item '{0}' not found")]
    ItemNotFound(ItemId),

    #[error("work item title must not be empty")]
    EmptyTitle,

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a move left the item where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedReason {
    AlreadyInTarget,
    /// No rule lets this trigger move the item out of its current column.
    NotPermitted,
    /// Another writer moved the item between our read and our write.
    LostRace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(WorkItem),
    Unchanged {
        item_id: ItemId,
        column: ColumnId,
        reason: UnchangedReason,
    },
}

impl MoveOutcome {
    pub fn is_moved(&self) -> bool {
        matches!(self, MoveOutcome::Moved(_))
    }
}

/// Guarded column transitions over a work item store.
pub struct BoardStateMachine<S: WorkItemStore + ?Sized> {
    layout: Arc<BoardLayout>,
    store: Arc<S>,
    allocator: IdAllocator,
    display_prefix: String,
}

impl<S: WorkItemStore + ?Sized> Clone for BoardStateMachine<S> {
    fn clone(&self) -> Self {
        Self {
            layout: Arc::clone(&self.layout),
            store: Arc::clone(&self.store),
            allocator: self.allocator,
            display_prefix: self.display_prefix.clone(),
        }
    }
}

impl<S: WorkItemStore + ?Sized> BoardStateMachine<S> {
    pub fn new(layout: Arc<BoardLayout>, store: Arc<S>) -> Self {
        Self {
            layout,
            store,
            allocator: IdAllocator::new(super::types::DEFAULT_ID_WIDTH),
            display_prefix: String::new(),
        }
    }

    pub fn with_ids(mut self, allocator: IdAllocator, display_prefix: impl Into<String>) -> Self {
        self.allocator = allocator;
        self.display_prefix = display_prefix.into();
        self
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    /// Move an item into `target` if `trigger` permits it from the item's
    /// current column. A move that is not permitted, or that loses a race to
    /// another writer, is reported as `Unchanged` rather than as an error.
    pub async fn move_work_item(
        &self,
        item_id: &ItemId,
        target: &ColumnId,
        trigger: Trigger,
    ) -> Result<MoveOutcome, BoardError> {
        if !self.layout.contains(target) {
            return Err(BoardError::UnknownColumn(target.clone()));
        }

        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| BoardError::ItemNotFound(item_id.clone()))?;
        let current = item.column;

        if &current == target {
            debug!(item = %item_id, column = %current, %trigger, "Item already in target column");
            return Ok(MoveOutcome::Unchanged {
                item_id: item_id.clone(),
                column: current,
                reason: UnchangedReason::AlreadyInTarget,
            });
        }

        if !self.layout.permits(&current, target, trigger) {
            info!(
                item = %item_id,
                actual = %current,
                target = %target,
                %trigger,
                "Stale transition ignored"
            );
            return Ok(MoveOutcome::Unchanged {
                item_id: item_id.clone(),
                column: current,
                reason: UnchangedReason::NotPermitted,
            });
        }

        match self
            .store
            .move_if_in_column(item_id, &current, target, Utc::now())
            .await?
        {
            Some(moved) => {
                info!(
                    item = %item_id,
                    from = %current,
                    to = %target,
                    position = moved.position,
                    %trigger,
                    "Moved work item"
                );
                Ok(MoveOutcome::Moved(moved))
            }
            None => {
                info!(
                    item = %item_id,
                    expected = %current,
                    target = %target,
                    %trigger,
                    "Lost move race, leaving item in place"
                );
                Ok(MoveOutcome::Unchanged {
                    item_id: item_id.clone(),
                    column: current,
                    reason: UnchangedReason::LostRace,
                })
            }
        }
    }

    /// Create a work item under a freshly allocated id.
    pub async fn create_item(&self, new_item: NewWorkItem) -> Result<WorkItem, BoardError> {
        if new_item.title.trim().is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        if !self.layout.contains(&new_item.column) {
            return Err(BoardError::UnknownColumn(new_item.column));
        }

        let existing = self.store.item_ids().await?;
        let store = &self.store;
        let prefix = self.display_prefix.as_str();
        let created = self
            .allocator
            .allocate(&existing, |id| {
                let item = new_item.clone().into_item(id, prefix, Utc::now());
                async move { store.insert_item(item).await }
            })
            .await?;

        info!(item = %created.id, column = %created.column, "Created work item");
        Ok(created)
    }

    /// Items of one column ordered by position.
    pub async fn column_items(&self, column: &ColumnId) -> Result<Vec<WorkItem>, BoardError> {
        let mut items: Vec<WorkItem> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter(|i| &i.column == column)
            .collect();
        items.sort_by_key(|i| (i.position, i.moved_at));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn board_with(items: &[(u64, &str)]) -> (BoardStateMachine<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (n, column) in items {
            let item = NewWorkItem::new(format!("item {n}"), "", ColumnId::from(*column))
                .into_item(ItemId::from_number(*n, 4), "", Utc::now());
            store.insert_item(item).await.unwrap();
        }
        let layout = Arc::new(BoardLayout::standard().unwrap());
        (BoardStateMachine::new(layout, store.clone()), store)
    }

    #[tokio::test]
    async fn test_start_then_duplicate_completion_moves_once() {
        let (board, store) = board_with(&[(10, "ToDo"), (11, "Doing")]).await;
        let id = ItemId::from("0010");
        let doing = ColumnId::from("Doing");
        let qa = ColumnId::from("QA");

        match board.move_work_item(&id, &doing, Trigger::AgentStart).await.unwrap() {
            MoveOutcome::Moved(item) => {
                assert_eq!(item.column, doing);
                // 0011 was already in Doing
                assert_eq!(item.position, 1);
            }
            other => panic!("expected move, got {other:?}"),
        }

        let first = board.move_work_item(&id, &qa, Trigger::AgentComplete).await.unwrap();
        assert!(first.is_moved());
        let writes = store.write_count();

        let second = board.move_work_item(&id, &qa, Trigger::AgentComplete).await.unwrap();
        assert_eq!(
            second,
            MoveOutcome::Unchanged {
                item_id: id.clone(),
                column: qa.clone(),
                reason: UnchangedReason::AlreadyInTarget,
            }
        );
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.get_item(&id).await.unwrap().unwrap().column, qa);
    }

    #[tokio::test]
    async fn test_out_of_order_trigger_is_a_no_op() {
        let (board, _store) = board_with(&[(1, "ToDo")]).await;
        let outcome = board
            .move_work_item(&ItemId::from("0001"), &ColumnId::from("QA"), Trigger::AgentComplete)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            MoveOutcome::Unchanged {
                reason: UnchangedReason::NotPermitted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_target_and_missing_item_are_errors() {
        let (board, _store) = board_with(&[(1, "ToDo")]).await;
        let err = board
            .move_work_item(&ItemId::from("0001"), &ColumnId::from("Limbo"), Trigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::UnknownColumn(_)));

        let err = board
            .move_work_item(&ItemId::from("0099"), &ColumnId::from("Doing"), Trigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_item_allocates_next_id() {
        let (board, _store) = board_with(&[(1, "ToDo"), (2, "QA")]).await;
        let board = board.with_ids(IdAllocator::new(4), "LK");
        let created = board
            .create_item(NewWorkItem::new("Fix login", "details", ColumnId::from("ToDo")))
            .await
            .unwrap();
        assert_eq!(created.id.as_str(), "0003");
        assert_eq!(created.display_id, "LK-0003");
        assert_eq!(created.position, 1);

        let err = board
            .create_item(NewWorkItem::new("  ", "", ColumnId::from("ToDo")))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::EmptyTitle));
    }
}
