// Downstream synchronization run once per successful completion

use async_trait::async_trait;
use octocrab::Octocrab;
use thiserror::Error;
use tracing::info;

use crate::board::WorkItem;
use crate::config::GitHubSyncConfig;
use crate::runs::RunRecord;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("GitHub API error: {0}")]
    GitHub(#[from] octocrab::Error),

    #[error("sync is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Published { target: String },
    /// Nothing to sync for this item.
    Skipped,
}

#[async_trait]
pub trait DownstreamSync: Send + Sync {
    async fn publish(
        &self,
        item: &WorkItem,
        run: &RunRecord,
        summary: &str,
    ) -> Result<SyncOutcome, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

#[async_trait]
impl DownstreamSync for NoopSync {
    async fn publish(&self, _: &WorkItem, _: &RunRecord, _: &str) -> Result<SyncOutcome, SyncError> {
        Ok(SyncOutcome::Skipped)
    }
}

/// Issue number from an external reference of the form `github#123`.
pub fn github_issue_number(external_ref: &str) -> Option<u64> {
    external_ref
        .strip_prefix("github#")
        .and_then(|n| n.trim().parse().ok())
}

/// Posts the run summary as a comment on the item's linked GitHub issue
#[derive(Debug, Clone)]
pub struct GitHubIssueSync {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubIssueSync {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
        }
    }

    pub fn from_config(config: &GitHubSyncConfig) -> Result<Self, SyncError> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| SyncError::NotConfigured("set github.token or GITHUB_TOKEN".to_string()))?;
        let octocrab = Octocrab::builder().personal_token(token).build()?;
        Ok(Self::new(octocrab, config.owner.clone(), config.repo.clone()))
    }

    fn comment_body(item: &WorkItem, run: &RunRecord, summary: &str) -> String {
        let mut body = format!(
            "**{} run finished** for {} (run `{}`)\n\n{}",
            run.agent_kind, item.display_id, run.run_id, summary
        );
        if let Some(artifact) = &run.artifact {
            body.push_str(&format!("\n\nArtifact: {artifact}"));
        }
        body
    }
}

#[async_trait]
impl DownstreamSync for GitHubIssueSync {
    async fn publish(
        &self,
        item: &WorkItem,
        run: &RunRecord,
        summary: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(issue_number) = item.external_ref.as_deref().and_then(github_issue_number) else {
            return Ok(SyncOutcome::Skipped);
        };

        self.octocrab
            .issues(&self.owner, &self.repo)
            .create_comment(issue_number, Self::comment_body(item, run, summary))
            .await?;

        info!(item = %item.id, issue = issue_number, "Posted run summary to GitHub issue");
        Ok(SyncOutcome::Published {
            target: format!("{}/{}#{issue_number}", self.owner, self.repo),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_reference_parsing() {
        assert_eq!(github_issue_number("github#123"), Some(123));
        assert_eq!(github_issue_number("github#abc"), None);
        assert_eq!(github_issue_number("jira#5"), None);
    }
}
