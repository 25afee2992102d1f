use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::board::ItemId;
use crate::external::ErrorCategory;

/// The closed set of agent kinds a run can be executed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Implementation,
    Qa,
    Review,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Implementation, AgentKind::Qa, AgentKind::Review];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Implementation => "implementation",
            AgentKind::Qa => "qa",
            AgentKind::Review => "review",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implementation" => Ok(AgentKind::Implementation),
            "qa" => Ok(AgentKind::Qa),
            "review" => Ok(AgentKind::Review),
            other => Err(format!("unknown agent kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the external service assigned to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalJobId(String);

impl ExternalJobId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// created -> launching -> running -> {finished | failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Launching,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Failed)
    }

    /// Legal edges of the run lifecycle. Staying in the same non-terminal
    /// status is allowed so keyed updates can touch other fields.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Finished, _) | (Failed, _) => false,
            (current, next) if *current == next => true,
            (Created, Launching) | (Created, Failed) => true,
            (Launching, Running) | (Launching, Failed) => true,
            (Running, Finished) | (Running, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Launching => "launching",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "launching" => Ok(RunStatus::Launching),
            "running" => Ok(RunStatus::Running),
            "finished" => Ok(RunStatus::Finished),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One tracked attempt to execute an external agent job against a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub item_id: ItemId,
    pub agent_kind: AgentKind,
    pub status: RunStatus,
    pub instruction: String,
    pub caller: String,
    pub external_job_id: Option<ExternalJobId>,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub summary: Option<String>,
    pub artifact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(
        item_id: ItemId,
        agent_kind: AgentKind,
        instruction: impl Into<String>,
        caller: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: RunId::generate(),
            item_id,
            agent_kind,
            status: RunStatus::Created,
            instruction: instruction.into(),
            caller: caller.into(),
            external_job_id: None,
            last_error: None,
            error_category: None,
            summary: None,
            artifact: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A keyed single-row update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub external_job_id: Option<ExternalJobId>,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub summary: Option<String>,
    pub artifact: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: ExternalJobId) -> Self {
        self.external_job_id = Some(job_id);
        self
    }

    pub fn with_error(mut self, category: ErrorCategory, message: impl Into<String>) -> Self {
        self.error_category = Some(category);
        self.last_error = Some(message.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Option<String>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    /// Apply onto a record. The caller has already checked the status edge
    /// and the external job id immutability.
    pub fn apply(&self, record: &mut RunRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(job_id) = &self.external_job_id {
            record.external_job_id = Some(job_id.clone());
        }
        if let Some(error) = &self.last_error {
            record.last_error = Some(error.clone());
        }
        if let Some(category) = self.error_category {
            record.error_category = Some(category);
        }
        if let Some(summary) = &self.summary {
            record.summary = Some(summary.clone());
        }
        if let Some(artifact) = &self.artifact {
            record.artifact = Some(artifact.clone());
        }
        if let Some(finished_at) = self.finished_at {
            record.finished_at = Some(finished_at);
        }
        record.updated_at = now;
    }
}
