use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::board::ItemId;
use crate::external::ErrorCategory;
use crate::runs::{AgentKind, RunId, RunRecord, RunStatus};

/// Progress stages of one invocation, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preparing,
    FetchingInput,
    ResolvingTarget,
    Launching,
    Running,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::FetchingInput => "fetching_input",
            Stage::ResolvingTarget => "resolving_target",
            Stage::Launching => "launching",
            Stage::Running => "running",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the progress stream. Every record names its run, item and
/// agent kind so it can be read without the records before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    /// Absent only when a request was rejected before a run existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub item_id: ItemId,
    pub agent_kind: AgentKind,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

impl StageEvent {
    pub fn for_run(run: &RunRecord, stage: Stage) -> Self {
        Self {
            run_id: Some(run.run_id.clone()),
            item_id: run.item_id.clone(),
            agent_kind: run.agent_kind,
            stage,
            timestamp: Utc::now(),
            run_status: Some(run.status),
            detail: None,
            artifact: None,
            content: None,
            error: None,
            error_category: None,
        }
    }

    /// Terminal record for a request refused before any run was created.
    pub fn rejected(item_id: ItemId, agent_kind: AgentKind, error: impl Into<String>) -> Self {
        Self {
            run_id: None,
            item_id,
            agent_kind,
            stage: Stage::Failed,
            timestamp: Utc::now(),
            run_status: None,
            detail: None,
            artifact: None,
            content: None,
            error: Some(error.into()),
            error_category: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Option<String>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_error(mut self, category: ErrorCategory) -> Self {
        self.error = Some(category.human_message().to_string());
        self.error_category = Some(category);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
