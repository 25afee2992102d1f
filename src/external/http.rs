use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::service::{
    ExecutionService, JobFailure, JobHandle, JobRequest, JobSnapshot, JobState, ServiceError,
};
use crate::config::ServiceConfig;
use crate::runs::ExternalJobId;

/// Rate-limited JSON/HTTP client for the execution service
#[derive(Debug)]
pub struct HttpExecutionService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    prompt: PromptBody<'a>,
    source: SourceBody<'a>,
    metadata: MetadataBody<'a>,
}

#[derive(Debug, Serialize)]
struct PromptBody<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SourceBody<'a> {
    repository: &'a str,
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataBody<'a> {
    run_id: &'a str,
}

/// Loosely-typed job payload as it arrives on the wire
#[derive(Debug, Deserialize)]
struct RawJob {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    target: Option<RawTarget>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    pr_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawErrorEnvelope {
    error: Option<RawError>,
    message: Option<String>,
}

fn parse_state(raw: &str) -> Option<JobState> {
    let state = match raw.to_ascii_uppercase().as_str() {
        "CREATING" | "PENDING" | "QUEUED" => JobState::Pending,
        "RUNNING" | "IN_PROGRESS" => JobState::Running,
        "FINISHED" | "COMPLETED" | "SUCCEEDED" => JobState::Finished,
        "ERROR" | "FAILED" => JobState::Failed,
        "CANCELLED" | "CANCELED" => JobState::Cancelled,
        "EXPIRED" => JobState::Expired,
        _ => return None,
    };
    Some(state)
}

impl RawJob {
    /// Close the payload into a validated snapshot; unknown shapes are rejected.
    fn validate(self) -> Result<JobSnapshot, ServiceError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ServiceError::UnexpectedResponse("job payload has no id".to_string()))?;
        let raw_status = self.status.ok_or_else(|| {
            ServiceError::UnexpectedResponse(format!("job {id} payload has no status"))
        })?;
        let state = parse_state(&raw_status).ok_or_else(|| {
            ServiceError::UnexpectedResponse(format!("job {id} has unknown status '{raw_status}'"))
        })?;

        let failure = match (state, self.error) {
            (JobState::Failed | JobState::Cancelled | JobState::Expired, Some(err)) => Some(JobFailure {
                code: err.code,
                message: err.message.unwrap_or_default(),
            }),
            (JobState::Failed | JobState::Cancelled | JobState::Expired, None) => Some(JobFailure {
                code: Some(raw_status.to_ascii_lowercase()),
                message: String::new(),
            }),
            _ => None,
        };

        Ok(JobSnapshot {
            job_id: ExternalJobId::new(id),
            state,
            summary: self.summary,
            artifact: self.target.and_then(|t| t.pr_url.or(t.url)),
            failure,
        })
    }
}

impl HttpExecutionService {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            rate_limiter,
        })
    }

    fn api_key(&self) -> Result<&str, ServiceError> {
        self.api_key.as_deref().ok_or_else(|| {
            ServiceError::NotConfigured(
                "no API key; set service.api_key or LANEKEEPER_API_KEY".to_string(),
            )
        })
    }

    async fn read_job(&self, response: reqwest::Response) -> Result<JobSnapshot, ServiceError> {
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            let envelope: Option<RawErrorEnvelope> = serde_json::from_str(&text).ok();
            let (code, message) = match envelope {
                Some(RawErrorEnvelope {
                    error: Some(err), ..
                }) => (err.code, err.message.unwrap_or_default()),
                Some(RawErrorEnvelope { message, .. }) => (None, message.unwrap_or_default()),
                None => (None, text.clone()),
            };
            warn!(status = status.as_u16(), code = ?code, body = %text, "Execution service error response");
            return Err(ServiceError::Http {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let raw: RawJob = serde_json::from_str(&text)
            .map_err(|e| ServiceError::UnexpectedResponse(format!("invalid job JSON: {e}")))?;
        raw.validate()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(err.to_string())
    }
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    fn ensure_ready(&self) -> Result<(), ServiceError> {
        self.api_key().map(|_| ())
    }

    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError> {
        let key = self.api_key()?;
        self.rate_limiter.until_ready().await;

        let body = SubmitBody {
            prompt: PromptBody {
                text: &request.prompt,
            },
            source: SourceBody {
                repository: &request.repository,
                git_ref: &request.git_ref,
            },
            metadata: MetadataBody {
                run_id: request.run_id.as_str(),
            },
        };

        debug!(run_id = %request.run_id, repository = %request.repository, "Submitting job");
        let response = self
            .client
            .post(format!("{}/v1/jobs", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let snapshot = self.read_job(response).await?;
        Ok(JobHandle {
            job_id: snapshot.job_id,
            state: snapshot.state,
        })
    }

    async fn job_status(&self, job_id: &ExternalJobId) -> Result<JobSnapshot, ServiceError> {
        let key = self.api_key()?;
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .bearer_auth(key)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let snapshot = self.read_job(response).await?;
        if &snapshot.job_id != job_id {
            return Err(ServiceError::UnexpectedResponse(format!(
                "asked for job {job_id}, got {}",
                snapshot.job_id
            )));
        }
        Ok(snapshot)
    }
}
