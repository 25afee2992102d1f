use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::run_coordinator::{AdvanceOutcome, RunCoordinator};
use crate::errors::OrchestratorError;
use crate::events::StageSink;
use crate::runs::RunId;

/// How a driven run ended.
#[derive(Debug)]
pub enum DriveResult {
    Done(AdvanceOutcome),
    /// Polling stopped on request; the external job keeps running.
    Stopped(AdvanceOutcome),
}

/// Background task that keeps advancing one run until it is terminal.
pub struct RunDriver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<DriveResult, OrchestratorError>>,
}

impl RunDriver {
    pub fn spawn(coordinator: Arc<RunCoordinator>, run_id: RunId, sink: StageSink) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drive(coordinator, run_id, sink, shutdown_rx));
        Self { shutdown, task }
    }

    /// Stop polling after the current slice. The external job is not
    /// cancelled.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn join(self) -> Result<DriveResult, OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::validation(format!("run driver task failed: {e}")))?
    }
}

/// Advance `run_id` in budget-sized slices until it is done or `shutdown`
/// flips to true.
pub async fn drive(
    coordinator: Arc<RunCoordinator>,
    run_id: RunId,
    mut sink: StageSink,
    mut shutdown: watch::Receiver<bool>,
) -> Result<DriveResult, OrchestratorError> {
    let policy = *coordinator.policy();
    let budget = policy.clamp(None);
    let mut slices = 0u32;
    loop {
        let started = Instant::now();
        let outcome = coordinator.advance(&run_id, None, &mut sink).await?;
        slices += 1;
        if outcome.done {
            info!(run.id = %run_id, slices, status = %outcome.run.status, "Run driven to completion");
            return Ok(DriveResult::Done(outcome));
        }
        if *shutdown.borrow() {
            info!(run.id = %run_id, slices, "Run driver stopped; job left running remotely");
            return Ok(DriveResult::Stopped(outcome));
        }
        debug!(run.id = %run_id, slices, "Slice ended before completion");

        let pause = policy.pause_between_slices(budget, started.elapsed());
        if pause.is_zero() {
            continue;
        }
        tokio::select! {
            _ = sleep(pause) => {}
            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(run.id = %run_id, slices, "Run driver stopped; job left running remotely");
                    return Ok(DriveResult::Stopped(outcome));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardLayout, BoardStateMachine, ColumnId, ItemId, NewWorkItem};
    use crate::config::{default_agents, LanekeeperConfig};
    use crate::coordinator::BudgetPolicy;
    use crate::events::{channel, Stage, StageEvent};
    use crate::external::{JobSnapshot, JobState, MockExecutionService, ServiceError};
    use crate::runs::{
        AgentKind, AgentRegistry, ExternalJobId, RunPatch, RunRecord, RunStatus,
    };
    use crate::store::{MemoryStore, RunStore, SharedStore, WorkItemStore};
    use chrono::Utc;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordinator(store: &Arc<MemoryStore>, service: MockExecutionService) -> Arc<RunCoordinator> {
        let shared: SharedStore = store.clone();
        let layout = Arc::new(BoardLayout::standard().unwrap());
        let agents = Arc::new(AgentRegistry::from_config(&default_agents(), &layout).unwrap());
        let board = BoardStateMachine::new(layout, Arc::clone(&shared));
        let mut service_config = LanekeeperConfig::default().service;
        service_config.default_repository = Some("acme/widgets".to_string());
        Arc::new(RunCoordinator::new(
            shared,
            board,
            agents,
            Arc::new(service),
            service_config,
            BudgetPolicy::default(),
        ))
    }

    /// Implementation run on item 0001, advanced up to `status`.
    async fn seed_run(store: &MemoryStore, status: RunStatus) -> RunRecord {
        let item = NewWorkItem::new("Add CSV export", "", ColumnId::from("Doing")).into_item(
            ItemId::from("0001"),
            "LK",
            Utc::now(),
        );
        store.insert_item(item).await.unwrap();
        let run = RunRecord::new(
            ItemId::from("0001"),
            AgentKind::Implementation,
            "build it",
            "tester",
            Utc::now(),
        );
        store.insert_run(&run).await.unwrap();
        let launching = store
            .update_run(&run.run_id, RunStatus::Created, &RunPatch::status(RunStatus::Launching))
            .await
            .unwrap()
            .unwrap();
        if status == RunStatus::Launching {
            return launching;
        }
        let patch = RunPatch::status(RunStatus::Running).with_job_id(ExternalJobId::new("J1"));
        store
            .update_run(&run.run_id, RunStatus::Launching, &patch)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_slices_wait_a_poll_interval() {
        let store = Arc::new(MemoryStore::new());
        let run = seed_run(&store, RunStatus::Running).await;

        let polls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&polls);
        let mut service = MockExecutionService::new();
        service.expect_submit_job().never();
        service.expect_job_status().returning(move |id| {
            if counter.fetch_add(1, Ordering::SeqCst) < 5 {
                Err(ServiceError::Http {
                    status: 429,
                    code: None,
                    message: "slow down".to_string(),
                })
            } else {
                Ok(JobSnapshot {
                    state: JobState::Finished,
                    summary: Some("Export added".to_string()),
                    ..JobSnapshot::pending(id.clone())
                })
            }
        });
        let coordinator = coordinator(&store, service);
        let interval = coordinator.policy().poll_interval;
        let (_stop, shutdown) = watch::channel(false);

        let started = Instant::now();
        let result = drive(coordinator, run.run_id.clone(), StageSink::detached(), shutdown)
            .await
            .unwrap();

        let DriveResult::Done(outcome) = result else {
            panic!("expected the run to finish");
        };
        assert_eq!(outcome.run.status, RunStatus::Finished);
        assert_eq!(polls.load(Ordering::SeqCst), 6);
        assert!(started.elapsed() >= interval * 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflight_launch_is_announced_once_across_slices() {
        let store = Arc::new(MemoryStore::new());
        let run = seed_run(&store, RunStatus::Launching).await;

        let mut service = MockExecutionService::new();
        service.expect_submit_job().never();
        service.expect_job_status().never();
        let coordinator = coordinator(&store, service);
        let interval = coordinator.policy().poll_interval;

        let (sink, stream) = channel(16);
        let driver = RunDriver::spawn(coordinator, run.run_id.clone(), sink);
        sleep(interval * 3 + interval / 2).await;
        driver.stop();

        let DriveResult::Stopped(outcome) = driver.join().await.unwrap() else {
            panic!("expected the driver to stop");
        };
        assert_eq!(outcome.run.status, RunStatus::Launching);

        let records: Vec<StageEvent> = stream.collect().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, Stage::Launching);
    }
}
