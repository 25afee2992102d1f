use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::journal::FileJournal;
use super::snapshot::{ProjectJournal, TranscriptMessage};
use super::PersistenceError;
use crate::runs::{AgentKind, RunId};

/// A transcript as held by the durable remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTranscript {
    pub agent_kind: AgentKind,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub instance: Option<u32>,
    pub messages: Vec<TranscriptMessage>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, project_key: &str) -> Result<Vec<RemoteTranscript>, PersistenceError>;
}

/// No remote store configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteTranscripts;

#[async_trait]
impl TranscriptSource for NoRemoteTranscripts {
    async fn fetch(&self, _project_key: &str) -> Result<Vec<RemoteTranscript>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// Transcripts exported from the central store as JSON files under
/// `<dir>/<project>/`.
#[derive(Debug, Clone)]
pub struct DirectoryTranscriptSource {
    directory: PathBuf,
}

impl DirectoryTranscriptSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl TranscriptSource for DirectoryTranscriptSource {
    async fn fetch(&self, project_key: &str) -> Result<Vec<RemoteTranscript>, PersistenceError> {
        let dir = self.directory.join(project_key.replace('/', "_"));
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut transcripts = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<RemoteTranscript>(&contents) {
                Ok(transcript) => transcripts.push(transcript),
                Err(e) => warn!(file = ?path, error = %e, "Skipping unreadable transcript"),
            }
        }
        transcripts.sort_by_key(|t| t.updated_at);
        Ok(transcripts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub updated: usize,
    pub created: usize,
}

/// Merge remote transcripts into the local journal. Remote content replaces
/// the local transcript; local status and progress are kept. A new instance
/// is created only when nothing local matches.
pub fn merge_remote(journal: &mut ProjectJournal, remote: Vec<RemoteTranscript>) -> MergeReport {
    let mut report = MergeReport::default();

    for transcript in remote {
        let kind = transcript.agent_kind;
        let matched = match (&transcript.run_id, transcript.instance) {
            (Some(run_id), _) if journal.position_by_run(kind, run_id).is_some() => {
                journal.position_by_run(kind, run_id)
            }
            (_, Some(instance)) => journal.position_by_instance(kind, instance),
            (None, None) => journal.position_latest(kind),
            (Some(_), None) => None,
        };

        match matched {
            Some(i) => {
                let snapshot = &mut journal.snapshots[i];
                snapshot.transcript = transcript.messages;
                if snapshot.run_id.is_none() {
                    snapshot.run_id = transcript.run_id;
                }
                if transcript.updated_at > snapshot.updated_at {
                    snapshot.updated_at = transcript.updated_at;
                }
                report.updated += 1;
            }
            None => {
                let snapshot = journal.new_instance(kind);
                debug!(kind = %kind, instance = snapshot.instance, "Tracking remote-only transcript");
                snapshot.run_id = transcript.run_id;
                snapshot.transcript = transcript.messages;
                snapshot.updated_at = transcript.updated_at;
                report.created += 1;
            }
        }
    }
    report
}

/// Load the local journal and reconcile it with the remote store.
pub async fn restore(
    journal_store: &FileJournal,
    source: &dyn TranscriptSource,
    project_key: &str,
) -> Result<ProjectJournal, PersistenceError> {
    let mut journal = journal_store.load(project_key).await?;
    let remote = source.fetch(project_key).await?;
    let report = merge_remote(&mut journal, remote);
    info!(
        project = project_key,
        updated = report.updated,
        created = report.created,
        "Restored journal"
    );
    Ok(journal)
}
