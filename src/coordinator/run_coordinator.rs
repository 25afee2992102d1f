use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn, Instrument};

use super::brief::TaskBrief;
use super::budget::BudgetPolicy;
use super::completion::CompletionHandler;
use crate::board::{BoardStateMachine, ItemId, Trigger, WorkItem};
use crate::config::ServiceConfig;
use crate::errors::OrchestratorError;
use crate::events::{Stage, StageEvent, StageSink};
use crate::external::{ErrorCategory, ErrorTranslator, ExecutionService, JobRequest, JobState};
use crate::runs::{
    AgentKind, AgentProfile, AgentRegistry, ExternalJobId, RunId, RunPatch, RunRecord, RunStatus,
};
use crate::store::{ContentStore, SharedStore};
use crate::sync::{DownstreamSync, NoopSync};
use crate::telemetry::{create_coordination_span, generate_correlation_id};

/// Start work on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub item_id: ItemId,
    pub agent_kind: AgentKind,
    #[serde(default)]
    pub instruction: String,
    pub caller: String,
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

/// Result of one bounded invocation. `done: false` means the budget ran out
/// while the job was still going; invoke again with the same run id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceOutcome {
    pub done: bool,
    pub run: RunRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdvanceOutcome {
    fn pending(run: RunRecord) -> Self {
        Self {
            done: false,
            run,
            content: None,
            artifact: None,
            error: None,
        }
    }

    fn terminal(run: RunRecord) -> Self {
        let (content, error) = match run.status {
            RunStatus::Finished => (run.summary.clone(), None),
            _ => (
                None,
                Some(
                    run.error_category
                        .unwrap_or(ErrorCategory::Unknown)
                        .human_message()
                        .to_string(),
                ),
            ),
        };
        Self {
            done: true,
            artifact: run.artifact.clone(),
            run,
            content,
            error,
        }
    }
}

/// Submits runs to the execution service and polls them within a budget.
pub struct RunCoordinator {
    store: SharedStore,
    board: BoardStateMachine<dyn ContentStore>,
    agents: Arc<AgentRegistry>,
    service: Arc<dyn ExecutionService>,
    service_config: ServiceConfig,
    completion: CompletionHandler,
    translator: ErrorTranslator,
    policy: BudgetPolicy,
}

impl RunCoordinator {
    pub fn new(
        store: SharedStore,
        board: BoardStateMachine<dyn ContentStore>,
        agents: Arc<AgentRegistry>,
        service: Arc<dyn ExecutionService>,
        service_config: ServiceConfig,
        policy: BudgetPolicy,
    ) -> Self {
        let completion = CompletionHandler::new(
            Arc::clone(&store),
            board.clone(),
            Arc::clone(&agents),
            Arc::new(NoopSync),
        );
        Self {
            store,
            board,
            agents,
            service,
            service_config,
            completion,
            translator: ErrorTranslator::new(),
            policy,
        }
    }

    pub fn with_sync(mut self, sync: Arc<dyn DownstreamSync>) -> Self {
        self.completion = CompletionHandler::new(
            Arc::clone(&self.store),
            self.board.clone(),
            Arc::clone(&self.agents),
            sync,
        );
        self
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Create (or resume) the run for an item and drive it for one budget.
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let deadline = Instant::now() + self.policy.clamp(request.budget_ms);
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "launch",
            &request.item_id,
            request.agent_kind,
            None,
            &correlation_id,
        );
        self.launch_inner(request, deadline, sink).instrument(span).await
    }

    /// Continue an existing run for one budget. Safe to call repeatedly.
    pub async fn advance(
        &self,
        run_id: &RunId,
        budget_ms: Option<u64>,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let deadline = Instant::now() + self.policy.clamp(budget_ms);
        let run = self.load_run(run_id).await?;
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "advance",
            &run.item_id,
            run.agent_kind,
            Some(run_id.as_str()),
            &correlation_id,
        );
        self.continue_run(run, deadline, sink).instrument(span).await
    }

    async fn launch_inner(
        &self,
        request: &LaunchRequest,
        deadline: Instant,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        if request.caller.trim().is_empty() {
            return Err(OrchestratorError::validation("caller identity is required"));
        }
        let profile = self.profile(request.agent_kind)?;
        self.service
            .ensure_ready()
            .map_err(|e| OrchestratorError::from_service(e, &self.translator))?;
        let item = self.load_item(&request.item_id).await?;

        if let Some(active) = self.store.find_active_run(&item.id, request.agent_kind).await? {
            return self.resume_active(active, deadline, sink).await;
        }

        let brief = TaskBrief::build(profile, &item, &request.instruction, &self.service_config)?;
        let run = RunRecord::new(
            item.id.clone(),
            request.agent_kind,
            request.instruction.clone(),
            request.caller.trim(),
            Utc::now(),
        );
        if let Err(err) = self.store.insert_run(&run).await {
            if !err.is_unique_violation() {
                return Err(err.into());
            }
            // Lost a race with another launch for the same pair.
            if let Some(active) = self.store.find_active_run(&item.id, request.agent_kind).await? {
                return self.resume_active(active, deadline, sink).await;
            }
            return Err(err.into());
        }
        tracing::Span::current().record("run.id", run.run_id.as_str());
        info!(run.id = %run.run_id, item = %item.id, kind = %run.agent_kind, "Created run");

        if let Some(start) = &profile.start_column {
            self.board
                .move_work_item(&item.id, start, Trigger::AgentStart)
                .await?;
        }

        sink.emit(
            StageEvent::for_run(&run, Stage::Preparing)
                .with_detail(format!("Created {} run for {}", run.agent_kind, item.display_id)),
        )
        .await?;
        self.dispatch(run, &item, brief, deadline, sink).await
    }

    async fn resume_active(
        &self,
        active: RunRecord,
        deadline: Instant,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        tracing::Span::current().record("run.id", active.run_id.as_str());
        info!(run.id = %active.run_id, status = %active.status, "Reusing active run");
        sink.emit(
            StageEvent::for_run(&active, Stage::Preparing)
                .with_detail(format!("Resuming {} run {}", active.agent_kind, active.run_id)),
        )
        .await?;
        self.continue_run(active, deadline, sink).await
    }

    /// Emit input and target stages, claim the run and submit it once.
    async fn dispatch(
        &self,
        run: RunRecord,
        item: &WorkItem,
        brief: TaskBrief,
        deadline: Instant,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        sink.emit(
            StageEvent::for_run(&run, Stage::FetchingInput)
                .with_detail(format!("Loaded {}: {}", item.display_id, item.title)),
        )
        .await?;
        sink.emit(
            StageEvent::for_run(&run, Stage::ResolvingTarget)
                .with_detail(format!("Target {}@{}", brief.repository, brief.git_ref)),
        )
        .await?;

        let claimed = self
            .store
            .update_run(&run.run_id, RunStatus::Created, &RunPatch::status(RunStatus::Launching))
            .await?;
        let Some(run) = claimed else {
            info!(run.id = %run.run_id, "Run already claimed by another invocation");
            let current = self.load_run(&run.run_id).await?;
            return self.continue_boxed(current, deadline, sink).await;
        };

        sink.emit(
            StageEvent::for_run(&run, Stage::Launching)
                .with_detail(format!("Submitting job to {}", brief.repository)),
        )
        .await?;

        let request = JobRequest {
            run_id: run.run_id.clone(),
            prompt: brief.prompt,
            repository: brief.repository,
            git_ref: brief.git_ref,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let handle = match timeout(remaining, self.service.submit_job(&request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                let category = self.translator.categorize_service_error(&err);
                return self
                    .fail_run(run, RunStatus::Launching, category, &err.to_string(), sink)
                    .await;
            }
            Err(_) => {
                // The job may exist remotely; it is not resubmitted.
                return self
                    .fail_run(run, RunStatus::Launching, ErrorCategory::Timeout, "submit timed out", sink)
                    .await;
            }
        };

        let patch = RunPatch::status(RunStatus::Running).with_job_id(handle.job_id.clone());
        let Some(running) = self
            .store
            .update_run(&run.run_id, RunStatus::Launching, &patch)
            .await?
        else {
            warn!(run.id = %run.run_id, job = %handle.job_id, "Run changed while submitting; job id not recorded");
            let current = self.load_run(&run.run_id).await?;
            return self.continue_boxed(current, deadline, sink).await;
        };
        info!(run.id = %running.run_id, job = %handle.job_id, "Submitted job");

        sink.emit(
            StageEvent::for_run(&running, Stage::Running)
                .with_detail(format!("Job {} accepted", handle.job_id)),
        )
        .await?;
        self.poll(running, handle.job_id, deadline, sink).await
    }

    // Boxed so dispatch and continue_run can call each other.
    fn continue_boxed<'a>(
        &'a self,
        run: RunRecord,
        deadline: Instant,
        sink: &'a mut StageSink,
    ) -> BoxFuture<'a, Result<AdvanceOutcome, OrchestratorError>> {
        Box::pin(self.continue_run(run, deadline, sink))
    }

    async fn continue_run(
        &self,
        run: RunRecord,
        deadline: Instant,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        match run.status {
            RunStatus::Finished | RunStatus::Failed => self.report_terminal(run, sink).await,
            RunStatus::Created => {
                let profile = self.profile(run.agent_kind)?;
                let item = self.load_item(&run.item_id).await?;
                let brief = TaskBrief::build(profile, &item, &run.instruction, &self.service_config)?;
                self.dispatch(run, &item, brief, deadline, sink).await
            }
            RunStatus::Launching => self.check_stale_launch(run, sink).await,
            RunStatus::Running => match run.external_job_id.clone() {
                Some(job_id) => self.poll(run, job_id, deadline, sink).await,
                None => {
                    self.fail_run(
                        run,
                        RunStatus::Running,
                        ErrorCategory::LaunchInterrupted,
                        "running without an external job id",
                        sink,
                    )
                    .await
                }
            },
        }
    }

    /// A launch that never recorded a job id. Wait for the other invocation
    /// until the stale timeout, then fail rather than risk a second submit.
    async fn check_stale_launch(
        &self,
        run: RunRecord,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let age = (Utc::now() - run.updated_at).to_std().unwrap_or_default();
        if age >= self.policy.launch_stale_after {
            return self
                .fail_run(
                    run,
                    RunStatus::Launching,
                    ErrorCategory::LaunchInterrupted,
                    "launch never recorded an external job id",
                    sink,
                )
                .await;
        }
        // A sink spanning several slices already announced the wait.
        let announced = sink.last_event().is_some_and(|e| e.stage >= Stage::Launching);
        if !announced {
            sink.emit(
                StageEvent::for_run(&run, Stage::Launching)
                    .with_detail("Another invocation is submitting this run"),
            )
            .await?;
        }
        Ok(AdvanceOutcome::pending(run))
    }

    async fn poll(
        &self,
        mut run: RunRecord,
        job_id: ExternalJobId,
        deadline: Instant,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.budget_exhausted(run, &job_id, sink).await;
            }

            let status = match timeout(remaining, self.service.job_status(&job_id)).await {
                Ok(status) => status,
                Err(_) => return self.budget_exhausted(run, &job_id, sink).await,
            };

            let snapshot = match status {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    let category = self.translator.categorize_service_error(&err);
                    if !category.is_transient() {
                        return self
                            .fail_run(run, RunStatus::Running, category, &err.to_string(), sink)
                            .await;
                    }
                    warn!(run.id = %run.run_id, job = %job_id, error = %err, "Transient status check failure");
                    let patch = RunPatch::status(RunStatus::Running)
                        .with_error(category, category.human_message());
                    if let Some(updated) = self
                        .store
                        .update_run(&run.run_id, RunStatus::Running, &patch)
                        .await?
                    {
                        run = updated;
                    }
                    sink.emit(StageEvent::for_run(&run, Stage::Running).with_detail(format!(
                        "Status check failed ({}); advance again to retry",
                        category.as_str()
                    )))
                    .await?;
                    return Ok(AdvanceOutcome::pending(run));
                }
            };

            match snapshot.state {
                JobState::Pending | JobState::Running => {
                    let state = if snapshot.state == JobState::Pending { "pending" } else { "running" };
                    sink.emit(
                        StageEvent::for_run(&run, Stage::Running)
                            .with_detail(format!("Job {job_id} is {state}")),
                    )
                    .await?;
                    let wait = self
                        .policy
                        .poll_interval
                        .min(deadline.saturating_duration_since(Instant::now()));
                    sleep(wait).await;
                }
                JobState::Finished => {
                    let report = self.completion.complete(&run.run_id, &snapshot, sink).await?;
                    return Ok(AdvanceOutcome {
                        done: true,
                        artifact: report.run.artifact.clone(),
                        run: report.run,
                        content: Some(report.content),
                        error: None,
                    });
                }
                JobState::Failed | JobState::Cancelled | JobState::Expired => {
                    let category = match snapshot.state {
                        JobState::Cancelled => ErrorCategory::Cancelled,
                        JobState::Expired => ErrorCategory::Expired,
                        _ => snapshot
                            .failure
                            .as_ref()
                            .map(|f| self.translator.categorize_job_failure(f))
                            .unwrap_or(ErrorCategory::Unknown),
                    };
                    let raw = snapshot
                        .failure
                        .as_ref()
                        .map(|f| format!("{:?}: {}", f.code, f.message))
                        .unwrap_or_else(|| "job ended without a failure payload".to_string());
                    return self
                        .fail_run(run, RunStatus::Running, category, &raw, sink)
                        .await;
                }
            }
        }
    }

    async fn budget_exhausted(
        &self,
        run: RunRecord,
        job_id: &ExternalJobId,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        info!(run.id = %run.run_id, job = %job_id, "Budget exhausted, job still running");
        sink.emit(StageEvent::for_run(&run, Stage::Running).with_detail(format!(
            "Job {job_id} still running; advance run {} again to continue",
            run.run_id
        )))
        .await?;
        Ok(AdvanceOutcome::pending(run))
    }

    /// Mark the run failed with a translated category. The raw error is only
    /// logged.
    async fn fail_run(
        &self,
        run: RunRecord,
        expected: RunStatus,
        category: ErrorCategory,
        raw: &str,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        error!(
            run.id = %run.run_id,
            item = %run.item_id,
            category = category.as_str(),
            raw_error = raw,
            "Run failed"
        );
        let patch = RunPatch::status(RunStatus::Failed)
            .with_error(category, category.human_message())
            .finished_at(Utc::now());
        let failed = match self.store.update_run(&run.run_id, expected, &patch).await? {
            Some(failed) => failed,
            None => self.load_run(&run.run_id).await?,
        };
        if !failed.is_terminal() {
            // Someone else moved it on; report where it stands now.
            return Ok(AdvanceOutcome::pending(failed));
        }
        self.report_terminal(failed, sink).await
    }

    async fn report_terminal(
        &self,
        run: RunRecord,
        sink: &mut StageSink,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        if !sink.is_finished() {
            let event = match run.status {
                RunStatus::Finished => StageEvent::for_run(&run, Stage::Completed)
                    .with_content(run.summary.clone().unwrap_or_default())
                    .with_artifact(run.artifact.clone()),
                _ => StageEvent::for_run(&run, Stage::Failed)
                    .with_error(run.error_category.unwrap_or(ErrorCategory::Unknown)),
            };
            sink.emit(event).await?;
        }
        Ok(AdvanceOutcome::terminal(run))
    }

    fn profile(&self, kind: AgentKind) -> Result<&AgentProfile, OrchestratorError> {
        self.agents
            .get(kind)
            .ok_or_else(|| OrchestratorError::validation(format!("agent kind '{kind}' is not configured")))
    }

    async fn load_item(&self, id: &ItemId) -> Result<WorkItem, OrchestratorError> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("work item '{id}' not found")))
    }

    async fn load_run(&self, id: &RunId) -> Result<RunRecord, OrchestratorError> {
        self.store
            .get_run(id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("run '{id}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardLayout, ColumnId, NewWorkItem};
    use crate::config::{default_agents, LanekeeperConfig};
    use crate::external::{JobFailure, JobHandle, JobSnapshot, MockExecutionService, ServiceError};
    use crate::store::{MemoryStore, RunStore, WorkItemStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn coordinator(
        store: &Arc<MemoryStore>,
        service: MockExecutionService,
        policy: BudgetPolicy,
    ) -> RunCoordinator {
        let shared: SharedStore = store.clone();
        let layout = Arc::new(BoardLayout::standard().unwrap());
        let agents = Arc::new(AgentRegistry::from_config(&default_agents(), &layout).unwrap());
        let board = BoardStateMachine::new(layout, Arc::clone(&shared));
        let mut service_config = LanekeeperConfig::default().service;
        service_config.default_repository = Some("acme/widgets".to_string());
        RunCoordinator::new(shared, board, agents, Arc::new(service), service_config, policy)
    }

    async fn seed(store: &MemoryStore, id: &str, column: &str) {
        let item = NewWorkItem::new("Add CSV export", "Reports need CSV.", ColumnId::from(column))
            .into_item(ItemId::from(id), "LK", Utc::now());
        store.insert_item(item).await.unwrap();
    }

    fn snapshot(state: JobState) -> JobSnapshot {
        JobSnapshot {
            state,
            ..JobSnapshot::pending(ExternalJobId::new("X"))
        }
    }

    fn request(kind: AgentKind, budget_ms: u64) -> LaunchRequest {
        LaunchRequest {
            item_id: ItemId::from("0010"),
            agent_kind: kind,
            instruction: String::new(),
            caller: "alice".to_string(),
            budget_ms: Some(budget_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_polls_never_resubmit() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "0010", "ToDo").await;

        let polls = Arc::new(AtomicU32::new(0));
        let mut service = MockExecutionService::new();
        service.expect_ensure_ready().returning(|| Ok(()));
        service.expect_submit_job().times(1).returning(|_| {
            Ok(JobHandle {
                job_id: ExternalJobId::new("X"),
                state: JobState::Pending,
            })
        });
        let counter = Arc::clone(&polls);
        service
            .expect_job_status()
            .withf(|id: &ExternalJobId| id.as_str() == "X")
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) < 4 {
                    Ok(snapshot(JobState::Running))
                } else {
                    Ok(JobSnapshot {
                        summary: Some("Added the export".to_string()),
                        ..snapshot(JobState::Finished)
                    })
                }
            });
        let coordinator = coordinator(&store, service, BudgetPolicy::default());

        let mut sink = StageSink::detached();
        let first = coordinator
            .launch(&request(AgentKind::Implementation, 5_000), &mut sink)
            .await
            .unwrap();
        assert!(!first.done);
        assert_eq!(first.run.status, RunStatus::Running);
        assert_eq!(first.run.external_job_id, Some(ExternalJobId::new("X")));
        let item = store.get_item(&ItemId::from("0010")).await.unwrap().unwrap();
        assert_eq!(item.column, ColumnId::from("Doing"));

        // A second launch for the same pair resumes instead of submitting.
        let mut sink = StageSink::detached();
        let second = coordinator
            .launch(&request(AgentKind::Implementation, 5_000), &mut sink)
            .await
            .unwrap();
        assert!(!second.done);
        assert_eq!(second.run.run_id, first.run.run_id);

        let mut sink = StageSink::detached();
        let last = coordinator
            .advance(&first.run.run_id, Some(10_000), &mut sink)
            .await
            .unwrap();
        assert!(last.done);
        assert_eq!(last.run.status, RunStatus::Finished);
        assert_eq!(last.content.as_deref(), Some("Added the export"));
        assert_eq!(sink.last_event().unwrap().stage, Stage::Completed);

        let item = store.get_item(&ItemId::from("0010")).await.unwrap().unwrap();
        assert_eq!(item.column, ColumnId::from("QA"));
        assert!(item.body.contains(&crate::coordinator::run_marker(&first.run.run_id)));
        assert_eq!(store.runs_for_item(&item.id).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_is_translated_and_not_retried() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "0010", "QA").await;

        let mut service = MockExecutionService::new();
        service.expect_ensure_ready().returning(|| Ok(()));
        service.expect_submit_job().times(1).returning(|_| {
            Ok(JobHandle {
                job_id: ExternalJobId::new("X"),
                state: JobState::Pending,
            })
        });
        service.expect_job_status().times(1).returning(|_| {
            Ok(JobSnapshot {
                failure: Some(JobFailure {
                    code: Some("CLONE_FAILED".to_string()),
                    message: "fatal: could not read from git@internal:acme/widgets".to_string(),
                }),
                ..snapshot(JobState::Failed)
            })
        });
        let coordinator = coordinator(&store, service, BudgetPolicy::default());

        let mut sink = StageSink::detached();
        let outcome = coordinator
            .launch(&request(AgentKind::Qa, 5_000), &mut sink)
            .await
            .unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert_eq!(outcome.run.error_category, Some(ErrorCategory::RepositoryAccess));
        let error = outcome.error.unwrap();
        assert!(!error.contains("git@internal"));

        let event = sink.last_event().unwrap();
        assert_eq!(event.stage, Stage::Failed);
        assert_eq!(event.error_category, Some(ErrorCategory::RepositoryAccess));

        // Advancing a failed run only reports it.
        let mut sink = StageSink::detached();
        let again = coordinator.advance(&outcome.run.run_id, None, &mut sink).await.unwrap();
        assert!(again.done);
        assert_eq!(again.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_state() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "0010", "ToDo").await;
        let writes = store.write_count();

        let mut service = MockExecutionService::new();
        service
            .expect_ensure_ready()
            .returning(|| Err(ServiceError::NotConfigured("no API key".to_string())));
        service.expect_submit_job().times(0);
        let coordinator = coordinator(&store, service, BudgetPolicy::default());

        let err = coordinator
            .launch(&request(AgentKind::Implementation, 5_000), &mut StageSink::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConfigured(_)));
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_error_leaves_run_running() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "0010", "ToDo").await;

        let mut service = MockExecutionService::new();
        service.expect_ensure_ready().returning(|| Ok(()));
        service.expect_submit_job().times(1).returning(|_| {
            Ok(JobHandle {
                job_id: ExternalJobId::new("X"),
                state: JobState::Pending,
            })
        });
        service.expect_job_status().returning(|_| {
            Err(ServiceError::Http {
                status: 503,
                code: None,
                message: "upstream overloaded".to_string(),
            })
        });
        let coordinator = coordinator(&store, service, BudgetPolicy::default());

        let outcome = coordinator
            .launch(&request(AgentKind::Implementation, 5_000), &mut StageSink::detached())
            .await
            .unwrap();
        assert!(!outcome.done);
        assert_eq!(outcome.run.status, RunStatus::Running);
        assert_eq!(outcome.run.error_category, Some(ErrorCategory::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_stale_launch_fails_as_interrupted() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "0010", "ToDo").await;
        let run = RunRecord::new(ItemId::from("0010"), AgentKind::Review, "", "bob", Utc::now());
        store.insert_run(&run).await.unwrap();
        store
            .update_run(&run.run_id, RunStatus::Created, &RunPatch::status(RunStatus::Launching))
            .await
            .unwrap()
            .unwrap();

        let mut service = MockExecutionService::new();
        service.expect_submit_job().times(0);
        service.expect_job_status().times(0);
        let policy = BudgetPolicy {
            launch_stale_after: Duration::ZERO,
            ..BudgetPolicy::default()
        };
        let coordinator = coordinator(&store, service, policy);

        let outcome = coordinator
            .advance(&run.run_id, None, &mut StageSink::detached())
            .await
            .unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.run.error_category, Some(ErrorCategory::LaunchInterrupted));
    }
}
