use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::board::ItemId;
use crate::events::{Stage, StageEvent};
use crate::runs::{AgentKind, RunId, RunStatus};

pub const JOURNAL_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub stage: Stage,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Status and dialogue of one (agent kind, instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agent_kind: AgentKind,
    pub instance: u32,
    pub run_id: Option<RunId>,
    pub item_id: Option<ItemId>,
    /// Local-only; the remote store does not track it.
    pub status: Option<RunStatus>,
    pub progress: Vec<ProgressEntry>,
    pub last_error: Option<String>,
    pub transcript: Vec<TranscriptMessage>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(agent_kind: AgentKind, instance: u32) -> Self {
        Self {
            agent_kind,
            instance,
            run_id: None,
            item_id: None,
            status: None,
            progress: Vec::new(),
            last_error: None,
            transcript: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn push_progress(&mut self, entry: ProgressEntry, limit: usize) {
        self.progress.push(entry);
        if self.progress.len() > limit {
            let excess = self.progress.len() - limit;
            self.progress.drain(0..excess);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub hostname: String,
    pub saved_at: DateTime<Utc>,
}

/// Everything journaled for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectJournal {
    pub version: String,
    pub project_key: String,
    pub snapshots: Vec<StatusSnapshot>,
    /// Highest instance number handed out per kind. Never decreases.
    pub instance_counters: BTreeMap<AgentKind, u32>,
    pub checkpoint: Option<CheckpointMetadata>,
}

impl ProjectJournal {
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            project_key: project_key.into(),
            snapshots: Vec::new(),
            instance_counters: BTreeMap::new(),
            checkpoint: None,
        }
    }

    pub fn snapshots_for(&self, kind: AgentKind) -> impl Iterator<Item = &StatusSnapshot> {
        self.snapshots.iter().filter(move |s| s.agent_kind == kind)
    }

    pub fn position_by_run(&self, kind: AgentKind, run_id: &RunId) -> Option<usize> {
        self.snapshots
            .iter()
            .position(|s| s.agent_kind == kind && s.run_id.as_ref() == Some(run_id))
    }

    pub fn position_by_instance(&self, kind: AgentKind, instance: u32) -> Option<usize> {
        self.snapshots
            .iter()
            .position(|s| s.agent_kind == kind && s.instance == instance)
    }

    /// Highest-numbered instance of a kind.
    pub fn position_latest(&self, kind: AgentKind) -> Option<usize> {
        self.snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.agent_kind == kind)
            .max_by_key(|(_, s)| s.instance)
            .map(|(i, _)| i)
    }

    /// Start a genuinely new instance of `kind`.
    pub fn new_instance(&mut self, kind: AgentKind) -> &mut StatusSnapshot {
        let counter = self.instance_counters.entry(kind).or_insert(0);
        *counter += 1;
        let snapshot = StatusSnapshot::new(kind, *counter);
        self.snapshots.push(snapshot);
        let last = self.snapshots.len() - 1;
        &mut self.snapshots[last]
    }

    /// The snapshot tracking `run_id`, creating an instance only if none does.
    pub fn instance_for_run(&mut self, kind: AgentKind, run_id: &RunId) -> &mut StatusSnapshot {
        match self.position_by_run(kind, run_id) {
            Some(i) => &mut self.snapshots[i],
            None => {
                let snapshot = self.new_instance(kind);
                snapshot.run_id = Some(run_id.clone());
                snapshot
            }
        }
    }

    /// Fold a stage record into the matching snapshot. Records without a run
    /// id (rejected requests) are not journaled.
    pub fn record_event(&mut self, event: &StageEvent, progress_limit: usize) {
        let Some(run_id) = &event.run_id else {
            return;
        };
        let snapshot = self.instance_for_run(event.agent_kind, run_id);
        snapshot.item_id = Some(event.item_id.clone());
        if let Some(status) = event.run_status {
            snapshot.status = Some(status);
        }
        match event.stage {
            Stage::Completed => snapshot.status = Some(RunStatus::Finished),
            Stage::Failed => snapshot.status = Some(RunStatus::Failed),
            _ => {}
        }
        if let Some(error) = &event.error {
            snapshot.last_error = Some(error.clone());
        }
        if let Some(content) = &event.content {
            snapshot.transcript.push(TranscriptMessage {
                role: MessageRole::Agent,
                content: content.clone(),
                timestamp: event.timestamp,
            });
        }
        snapshot.push_progress(
            ProgressEntry {
                stage: event.stage,
                detail: event.detail.clone(),
                timestamp: event.timestamp,
            },
            progress_limit.max(1),
        );
        snapshot.updated_at = event.timestamp;
    }

    pub fn record_message(&mut self, kind: AgentKind, run_id: &RunId, message: TranscriptMessage) {
        let snapshot = self.instance_for_run(kind, run_id);
        snapshot.updated_at = message.timestamp;
        snapshot.transcript.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunRecord;

    #[test]
    fn test_events_for_one_run_share_an_instance() {
        let mut journal = ProjectJournal::new("demo");
        let run = RunRecord::new(ItemId::from("0001"), AgentKind::Review, "go", "ui", Utc::now());

        for stage in [Stage::Preparing, Stage::Launching, Stage::Running] {
            journal.record_event(&StageEvent::for_run(&run, stage), 2);
        }
        journal.record_event(
            &StageEvent::for_run(&run, Stage::Completed).with_content("All good"),
            2,
        );

        let snapshots: Vec<_> = journal.snapshots_for(AgentKind::Review).collect();
        assert_eq!(snapshots.len(), 1);
        let snapshot = snapshots[0];
        assert_eq!(snapshot.instance, 1);
        assert_eq!(snapshot.status, Some(RunStatus::Finished));
        // bounded to the two most recent entries
        let stages: Vec<Stage> = snapshot.progress.iter().map(|p| p.stage).collect();
        assert_eq!(stages, vec![Stage::Running, Stage::Completed]);
        assert_eq!(snapshot.transcript[0].content, "All good");
    }

    #[test]
    fn test_instance_numbers_are_monotonic_per_kind() {
        let mut journal = ProjectJournal::new("demo");
        assert_eq!(journal.new_instance(AgentKind::Qa).instance, 1);
        assert_eq!(journal.new_instance(AgentKind::Qa).instance, 2);
        assert_eq!(journal.new_instance(AgentKind::Review).instance, 1);

        journal.snapshots.retain(|s| s.instance != 2);
        assert_eq!(journal.new_instance(AgentKind::Qa).instance, 3);
    }
}
