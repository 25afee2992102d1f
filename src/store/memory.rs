use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{check_run_patch, RunStore, StoreError, WorkItemStore};
use crate::board::{ColumnId, ItemId, WorkItem};
use crate::runs::{AgentKind, RunId, RunPatch, RunRecord, RunStatus};

/// In-process store. Each operation holds the lock only for its own
/// read-modify-write, which gives the same guarantees as a single-row
/// conditional update in a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ItemId, WorkItem>>,
    runs: Mutex<HashMap<RunId, RunRecord>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn column_count(items: &HashMap<ItemId, WorkItem>, column: &ColumnId) -> u32 {
    items.values().filter(|i| &i.column == column).count() as u32
}

#[async_trait]
impl WorkItemStore for MemoryStore {
    async fn insert_item(&self, mut item: WorkItem) -> Result<WorkItem, StoreError> {
        let mut items = self.items.lock().await;
        if items.contains_key(&item.id) {
            return Err(StoreError::UniqueViolation(format!("work item id {}", item.id)));
        }
        if let Some(origin) = &item.origin {
            if items.values().any(|i| i.origin.as_ref() == Some(origin)) {
                return Err(StoreError::DuplicateOrigin(origin.clone()));
            }
        }
        item.position = column_count(&items, &item.column);
        items.insert(item.id.clone(), item.clone());
        self.record_write();
        Ok(item)
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<WorkItem>, StoreError> {
        Ok(self.items.lock().await.get(id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<WorkItem>, StoreError> {
        let mut items: Vec<WorkItem> = self.items.lock().await.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn move_if_in_column(
        &self,
        id: &ItemId,
        expected: &ColumnId,
        target: &ColumnId,
        moved_at: DateTime<Utc>,
    ) -> Result<Option<WorkItem>, StoreError> {
        let mut items = self.items.lock().await;
        let position = column_count(&items, target);
        let item = items.get_mut(id).ok_or_else(|| StoreError::item_not_found(id))?;
        if &item.column != expected {
            return Ok(None);
        }
        item.column = target.clone();
        item.position = position;
        item.moved_at = moved_at;
        let moved = item.clone();
        self.record_write();
        Ok(Some(moved))
    }

    async fn update_body_if(
        &self,
        id: &ItemId,
        expected: &str,
        body: &str,
    ) -> Result<bool, StoreError> {
        let mut items = self.items.lock().await;
        let item = items.get_mut(id).ok_or_else(|| StoreError::item_not_found(id))?;
        if item.body != expected {
            return Ok(false);
        }
        item.body = body.to_string();
        self.record_write();
        Ok(true)
    }

    async fn find_by_origin(&self, origin: &str) -> Result<Option<WorkItem>, StoreError> {
        Ok(self
            .items
            .lock()
            .await
            .values()
            .find(|i| i.origin.as_deref() == Some(origin))
            .cloned())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::UniqueViolation(format!("run id {}", run.run_id)));
        }
        if runs
            .values()
            .any(|r| r.item_id == run.item_id && r.agent_kind == run.agent_kind && !r.is_terminal())
        {
            return Err(StoreError::UniqueViolation(format!(
                "active {} run for item {}",
                run.agent_kind, run.item_id
            )));
        }
        runs.insert(run.run_id.clone(), run.clone());
        self.record_write();
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.runs.lock().await.get(id).cloned())
    }

    async fn find_active_run(
        &self,
        item: &ItemId,
        kind: AgentKind,
    ) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .runs
            .lock()
            .await
            .values()
            .filter(|r| &r.item_id == item && r.agent_kind == kind && !r.is_terminal())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn runs_for_item(&self, item: &ItemId) -> Result<Vec<RunRecord>, StoreError> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .lock()
            .await
            .values()
            .filter(|r| &r.item_id == item)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn update_run(
        &self,
        id: &RunId,
        expected: RunStatus,
        patch: &RunPatch,
    ) -> Result<Option<RunRecord>, StoreError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(id).ok_or_else(|| StoreError::run_not_found(id))?;
        if !check_run_patch(run, expected, patch)? {
            return Ok(None);
        }
        patch.apply(run, Utc::now());
        let updated = run.clone();
        self.record_write();
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::NewWorkItem;
    use crate::runs::ExternalJobId;

    fn item(id: u64, column: &str) -> WorkItem {
        NewWorkItem::new(format!("item {id}"), "", ColumnId::from(column)).into_item(
            ItemId::from_number(id, 4),
            "LK",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_assigns_end_of_column_position() {
        let store = MemoryStore::new();
        let a = store.insert_item(item(1, "ToDo")).await.unwrap();
        let b = store.insert_item(item(2, "ToDo")).await.unwrap();
        let c = store.insert_item(item(3, "Doing")).await.unwrap();
        assert_eq!((a.position, b.position, c.position), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_duplicate_id_and_origin_are_rejected() {
        let store = MemoryStore::new();
        store.insert_item(item(1, "ToDo")).await.unwrap();
        let err = store.insert_item(item(1, "ToDo")).await.unwrap_err();
        assert!(err.is_unique_violation());

        let mut with_origin = item(2, "ToDo");
        with_origin.origin = Some("suggestion:0001:x".to_string());
        store.insert_item(with_origin).await.unwrap();
        let mut again = item(3, "ToDo");
        again.origin = Some("suggestion:0001:x".to_string());
        let err = store.insert_item(again).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrigin(_)));
        assert!(!err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_move_is_guarded_on_expected_column() {
        let store = MemoryStore::new();
        store.insert_item(item(1, "ToDo")).await.unwrap();
        let id = ItemId::from_number(1, 4);
        let todo = ColumnId::from("ToDo");
        let doing = ColumnId::from("Doing");

        let moved = store.move_if_in_column(&id, &todo, &doing, Utc::now()).await.unwrap();
        assert_eq!(moved.unwrap().column, doing);

        let stale = store.move_if_in_column(&id, &todo, &doing, Utc::now()).await.unwrap();
        assert!(stale.is_none());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_run_update_rejects_job_id_rewrite() {
        let store = MemoryStore::new();
        let run = RunRecord::new(ItemId::from("0001"), AgentKind::Qa, "check", "tester", Utc::now());
        store.insert_run(&run).await.unwrap();

        let launch = RunPatch::status(RunStatus::Launching);
        store.update_run(&run.run_id, RunStatus::Created, &launch).await.unwrap().unwrap();

        let first = RunPatch::status(RunStatus::Running).with_job_id(ExternalJobId::new("X"));
        store.update_run(&run.run_id, RunStatus::Launching, &first).await.unwrap().unwrap();

        let rewrite = RunPatch::default().with_job_id(ExternalJobId::new("Y"));
        let err = store
            .update_run(&run.run_id, RunStatus::Running, &rewrite)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ImmutableField { .. }));

        let stale = store
            .update_run(&run.run_id, RunStatus::Created, &RunPatch::status(RunStatus::Launching))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_one_active_run_per_item_and_kind() {
        let store = MemoryStore::new();
        let item = ItemId::from("0001");
        let first = RunRecord::new(item.clone(), AgentKind::Review, "look", "ui", Utc::now());
        store.insert_run(&first).await.unwrap();

        let second = RunRecord::new(item.clone(), AgentKind::Review, "look", "ui", Utc::now());
        assert!(store.insert_run(&second).await.unwrap_err().is_unique_violation());

        let other_kind = RunRecord::new(item.clone(), AgentKind::Qa, "check", "ui", Utc::now());
        store.insert_run(&other_kind).await.unwrap();

        let failed = RunPatch::status(RunStatus::Failed);
        store.update_run(&first.run_id, RunStatus::Created, &failed).await.unwrap().unwrap();
        store.insert_run(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_body_update_only_applies_over_expected_body() {
        let store = MemoryStore::new();
        store.insert_item(item(1, "QA")).await.unwrap();
        let id = ItemId::from_number(1, 4);

        assert!(store.update_body_if(&id, "", "first").await.unwrap());
        assert!(!store.update_body_if(&id, "", "second").await.unwrap());
        assert_eq!(store.get_item(&id).await.unwrap().unwrap().body, "first");
        assert_eq!(store.write_count(), 2);
    }
}
