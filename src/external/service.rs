use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runs::{ExternalJobId, RunId};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("execution service is not configured: {0}")]
    NotConfigured(String),

    #[error("execution service returned HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// What gets submitted for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub run_id: RunId,
    pub prompt: String,
    pub repository: String,
    pub git_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: ExternalJobId,
    pub state: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: Option<String>,
    pub message: String,
}

/// Validated view of a job's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: ExternalJobId,
    pub state: JobState,
    pub summary: Option<String>,
    pub artifact: Option<String>,
    pub failure: Option<JobFailure>,
}

impl JobSnapshot {
    pub fn pending(job_id: ExternalJobId) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            summary: None,
            artifact: None,
            failure: None,
        }
    }
}

/// The slow, asynchronous code-generation/review service. Jobs cannot be
/// cancelled from this side.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Fail fast when credentials are missing, before any state is created.
    fn ensure_ready(&self) -> Result<(), ServiceError>;

    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError>;

    async fn job_status(&self, job_id: &ExternalJobId) -> Result<JobSnapshot, ServiceError>;
}
