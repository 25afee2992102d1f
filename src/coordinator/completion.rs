use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::board::{
    AllocationError, BoardError, BoardStateMachine, ItemId, NewWorkItem, Trigger, WorkItem,
};
use crate::errors::OrchestratorError;
use crate::events::{Stage, StageEvent, StageSink};
use crate::external::JobSnapshot;
use crate::runs::{AgentRegistry, RunId, RunPatch, RunRecord, RunStatus};
use crate::store::{ContentStore, SharedStore, StoreError};
use crate::sync::{DownstreamSync, SyncOutcome};

const SUGGESTION_KEY_LEN: usize = 80;
const FOLLOW_UP_TITLE_LEN: usize = 100;
const BODY_WRITE_ATTEMPTS: usize = 5;

static SUGGESTIONS_HEADING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*suggestions\s*:?\s*(?:\*\*)?\s*:?\s*$").ok()
});

static BULLET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+?)\s*$").ok());

/// What one completion invocation did.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub run: RunRecord,
    /// The run was already finished; nothing was written.
    pub already_finished: bool,
    pub moved: bool,
    pub summary_written: bool,
    pub follow_ups: Vec<ItemId>,
    pub sync: Option<SyncOutcome>,
    pub content: String,
}

/// Applies the side effects of a successful run. Every step is guarded so
/// repeated invocations for the same run converge on the same end state.
pub struct CompletionHandler {
    store: SharedStore,
    board: BoardStateMachine<dyn ContentStore>,
    agents: Arc<AgentRegistry>,
    sync: Arc<dyn DownstreamSync>,
}

pub fn run_marker(run_id: &RunId) -> String {
    format!("<!-- run:{run_id} -->")
}

/// Bullet items listed under a "Suggestions" heading.
pub fn extract_suggestions(summary: &str) -> Vec<String> {
    let (Some(heading), Some(bullet)) = (SUGGESTIONS_HEADING.as_ref(), BULLET.as_ref()) else {
        return Vec::new();
    };
    let mut suggestions = Vec::new();
    let mut in_section = false;

    for line in summary.lines() {
        if heading.is_match(line) {
            in_section = true;
            continue;
        }
        if !in_section || line.trim().is_empty() {
            continue;
        }
        match bullet.captures(line) {
            Some(caps) => suggestions.push(caps[1].to_string()),
            None => in_section = false,
        }
    }
    suggestions
}

/// Stable key for a suggestion: lowercase words, punctuation dropped.
pub fn normalize_suggestion(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    joined.chars().take(SUGGESTION_KEY_LEN).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

fn is_duplicate_origin(err: &BoardError) -> bool {
    matches!(
        err,
        BoardError::Store(StoreError::DuplicateOrigin(_))
            | BoardError::Allocation(AllocationError::Store(StoreError::DuplicateOrigin(_)))
    )
}

impl CompletionHandler {
    pub fn new(
        store: SharedStore,
        board: BoardStateMachine<dyn ContentStore>,
        agents: Arc<AgentRegistry>,
        sync: Arc<dyn DownstreamSync>,
    ) -> Self {
        Self {
            store,
            board,
            agents,
            sync,
        }
    }

    pub async fn complete(
        &self,
        run_id: &RunId,
        result: &JobSnapshot,
        sink: &mut StageSink,
    ) -> Result<CompletionReport, OrchestratorError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("run '{run_id}' not found")))?;

        match run.status {
            RunStatus::Finished => {
                debug!(run.id = %run_id, "Run already finished, nothing to apply");
                let content = run.summary.clone().unwrap_or_default();
                self.emit_completed(&run, &content, None, sink).await?;
                return Ok(CompletionReport {
                    run,
                    already_finished: true,
                    moved: false,
                    summary_written: false,
                    follow_ups: Vec::new(),
                    sync: None,
                    content,
                });
            }
            RunStatus::Running => {}
            other => {
                return Err(OrchestratorError::validation(format!(
                    "run '{run_id}' is {other}, not running"
                )))
            }
        }

        let profile = self.agents.get(run.agent_kind).ok_or_else(|| {
            OrchestratorError::validation(format!("agent kind '{}' is not configured", run.agent_kind))
        })?;
        let summary = result
            .summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("The {} agent finished without a summary.", run.agent_kind));

        let moved = self
            .board
            .move_work_item(&run.item_id, &profile.completion_column, Trigger::AgentComplete)
            .await?
            .is_moved();

        let item = self
            .store
            .get_item(&run.item_id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("work item '{}' not found", run.item_id)))?;
        let summary_written = self.append_summary(&item, &run, &summary, result).await?;

        let follow_ups = if profile.creates_follow_ups {
            self.create_follow_ups(&item, &summary).await?
        } else {
            Vec::new()
        };

        let sync = if summary_written {
            self.run_sync(&item.id, &run, &summary).await
        } else {
            None
        };

        let patch = RunPatch::status(RunStatus::Finished)
            .with_summary(summary.clone())
            .with_artifact(result.artifact.clone())
            .finished_at(Utc::now());
        let finished = match self.store.update_run(run_id, RunStatus::Running, &patch).await? {
            Some(finished) => finished,
            // Another invocation finished it first.
            None => self
                .store
                .get_run(run_id)
                .await?
                .ok_or_else(|| OrchestratorError::validation(format!("run '{run_id}' not found")))?,
        };

        info!(
            run.id = %run_id,
            item = %finished.item_id,
            moved,
            follow_ups = follow_ups.len(),
            "Run completed"
        );

        let detail = if moved {
            Some(format!("Moved {} to {}", item.display_id, profile.completion_column))
        } else {
            None
        };
        self.emit_completed(&finished, &summary, detail, sink).await?;

        Ok(CompletionReport {
            run: finished,
            already_finished: false,
            moved,
            summary_written,
            follow_ups,
            sync,
            content: summary,
        })
    }

    async fn emit_completed(
        &self,
        run: &RunRecord,
        content: &str,
        detail: Option<String>,
        sink: &mut StageSink,
    ) -> Result<(), OrchestratorError> {
        if sink.is_finished() {
            return Ok(());
        }
        let mut event = StageEvent::for_run(run, Stage::Completed)
            .with_content(content)
            .with_artifact(run.artifact.clone());
        event.detail = detail;
        sink.emit(event).await?;
        Ok(())
    }

    /// Append the marked summary section. The write is conditional on the
    /// body read just before it, so only one invocation per run gets `true`.
    async fn append_summary(
        &self,
        item: &WorkItem,
        run: &RunRecord,
        summary: &str,
        result: &JobSnapshot,
    ) -> Result<bool, OrchestratorError> {
        let marker = run_marker(&run.run_id);
        let mut current = item.body.clone();

        for _ in 0..BODY_WRITE_ATTEMPTS {
            if current.contains(&marker) {
                debug!(run.id = %run.run_id, "Summary already recorded on item");
                return Ok(false);
            }

            let mut body = current.trim_end().to_string();
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&format!("{marker}\n### {} run summary\n{}", run.agent_kind, summary.trim()));
            if let Some(artifact) = &result.artifact {
                body.push_str(&format!("\n\nArtifact: {artifact}"));
            }
            if self.store.update_body_if(&item.id, &current, &body).await? {
                return Ok(true);
            }

            current = self
                .store
                .get_item(&item.id)
                .await?
                .ok_or_else(|| OrchestratorError::validation(format!("work item '{}' not found", item.id)))?
                .body;
        }

        Err(StoreError::Backend(format!(
            "body of work item '{}' kept changing while recording run '{}'",
            item.id, run.run_id
        ))
        .into())
    }

    async fn create_follow_ups(
        &self,
        source: &WorkItem,
        summary: &str,
    ) -> Result<Vec<ItemId>, OrchestratorError> {
        let column = self
            .board
            .layout()
            .first_column()
            .cloned()
            .ok_or_else(|| OrchestratorError::validation("board has no columns"))?;

        let mut created = Vec::new();
        for suggestion in extract_suggestions(summary) {
            let key = normalize_suggestion(&suggestion);
            if key.is_empty() {
                continue;
            }
            let origin = format!("suggestion:{}:{key}", source.id);
            if self.store.find_by_origin(&origin).await?.is_some() {
                debug!(%origin, "Follow-up already exists");
                continue;
            }

            let body = format!(
                "Suggested during review of {}: {}\n\n{}",
                source.display_id, source.title, suggestion
            );
            let new_item = NewWorkItem::new(truncate(&suggestion, FOLLOW_UP_TITLE_LEN), body, column.clone())
                .with_origin(origin.clone());
            match self.board.create_item(new_item).await {
                Ok(item) => {
                    info!(source = %source.id, follow_up = %item.id, "Created follow-up ticket");
                    created.push(item.id);
                }
                Err(err) if is_duplicate_origin(&err) => {
                    debug!(%origin, "Follow-up created concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(created)
    }

    async fn run_sync(&self, item_id: &ItemId, run: &RunRecord, summary: &str) -> Option<SyncOutcome> {
        let item = match self.store.get_item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(err) => {
                warn!(item = %item_id, error = %err, "Could not load item for sync");
                return None;
            }
        };
        match self.sync.publish(&item, run, summary).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(item = %item_id, run.id = %run.run_id, error = %err, "Downstream sync failed");
                None
            }
        }
    }
}
