// Request/response surface over the run coordinator

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{error, warn};

use crate::coordinator::{AdvanceOutcome, LaunchRequest, RunCoordinator};
use crate::errors::OrchestratorError;
use crate::events::{channel, Stage, StageEvent, StageSink, StageStream, DEFAULT_STREAM_CAPACITY};
use crate::runs::RunId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub run_id: RunId,
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

/// `{done, run, ...}` on success, `{error}` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AdvanceResponse {
    Outcome(AdvanceOutcome),
    Error { error: String },
}

/// Continue a run for one budget. Safe to call repeatedly with the same run id.
pub async fn advance(coordinator: &RunCoordinator, request: &AdvanceRequest) -> AdvanceResponse {
    let mut sink = StageSink::detached();
    match coordinator
        .advance(&request.run_id, request.budget_ms, &mut sink)
        .await
    {
        Ok(outcome) => AdvanceResponse::Outcome(outcome),
        Err(err) => {
            error!(run.id = %request.run_id, error = %err, "Advance failed");
            AdvanceResponse::Error {
                error: err.user_message(),
            }
        }
    }
}

/// Launch a run and stream its stage records. With `follow`, the run keeps
/// being advanced until it is terminal; otherwise the stream ends after one
/// budget.
pub fn launch_and_stream(
    coordinator: Arc<RunCoordinator>,
    request: LaunchRequest,
    follow: bool,
) -> StageStream {
    let (mut sink, stream) = channel(DEFAULT_STREAM_CAPACITY);
    tokio::spawn(async move {
        if let Err(err) = run_launch(&coordinator, &request, follow, &mut sink).await {
            error!(item = %request.item_id, kind = %request.agent_kind, error = %err, "Launch failed");
            if !sink.is_finished() {
                let record = failure_record(&sink, &request, &err);
                if let Err(emit_err) = sink.emit(record).await {
                    warn!(error = %emit_err, "Could not emit failure record");
                }
            }
        }
    });
    stream
}

async fn run_launch(
    coordinator: &RunCoordinator,
    request: &LaunchRequest,
    follow: bool,
    sink: &mut StageSink,
) -> Result<AdvanceOutcome, OrchestratorError> {
    let policy = coordinator.policy();
    let budget = policy.clamp(request.budget_ms);
    let mut started = Instant::now();
    let mut outcome = coordinator.launch(request, sink).await?;
    while follow && !outcome.done {
        let pause = policy.pause_between_slices(budget, started.elapsed());
        if !pause.is_zero() {
            sleep(pause).await;
        }
        started = Instant::now();
        let run_id = outcome.run.run_id.clone();
        outcome = coordinator.advance(&run_id, request.budget_ms, sink).await?;
    }
    Ok(outcome)
}

/// Terminal record for an invocation that errored. Carries the run
/// identity when one was already announced.
fn failure_record(sink: &StageSink, request: &LaunchRequest, err: &OrchestratorError) -> StageEvent {
    let category = match err {
        OrchestratorError::ExternalService { category } => Some(*category),
        _ => None,
    };
    match sink.last_event() {
        Some(last) => StageEvent {
            stage: Stage::Failed,
            timestamp: Utc::now(),
            detail: None,
            artifact: None,
            content: None,
            error: Some(err.user_message()),
            error_category: category,
            ..last.clone()
        },
        None => {
            let mut record =
                StageEvent::rejected(request.item_id.clone(), request.agent_kind, err.user_message());
            record.error_category = category;
            record
        }
    }
}
