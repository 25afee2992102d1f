use statig::prelude::*;
use tracing::warn;

use super::stage::Stage;
use super::StreamError;

/// Ordering rules for one invocation's stage records: stages only move
/// forward (later stages may be skipped), `running` may repeat, and nothing
/// follows the single terminal record.
#[derive(Debug, Default)]
pub struct StageOrder;

fn forward(from: Stage, next: &Stage) -> Outcome<State> {
    if from.is_terminal() {
        return Handled;
    }
    if *next > from {
        Transition(enter(*next))
    } else {
        Handled
    }
}

fn enter(stage: Stage) -> State {
    match stage {
        Stage::Preparing => State::preparing(),
        Stage::FetchingInput => State::fetching_input(),
        Stage::ResolvingTarget => State::resolving_target(),
        Stage::Launching => State::launching(),
        Stage::Running => State::running(),
        Stage::Completed => State::completed(),
        Stage::Failed => State::failed(),
    }
}

fn stage_of(state: &State) -> Option<Stage> {
    match state {
        State::Idle { .. } => None,
        State::Preparing { .. } => Some(Stage::Preparing),
        State::FetchingInput { .. } => Some(Stage::FetchingInput),
        State::ResolvingTarget { .. } => Some(Stage::ResolvingTarget),
        State::Launching { .. } => Some(Stage::Launching),
        State::Running { .. } => Some(Stage::Running),
        State::Completed { .. } => Some(Stage::Completed),
        State::Failed { .. } => Some(Stage::Failed),
    }
}

#[state_machine(initial = "State::idle()", state(derive(Debug, Clone, PartialEq, Eq)))]
impl StageOrder {
    #[state]
    fn idle(event: &Stage) -> Outcome<State> {
        Transition(enter(*event))
    }

    #[state]
    fn preparing(event: &Stage) -> Outcome<State> {
        forward(Stage::Preparing, event)
    }

    #[state]
    fn fetching_input(event: &Stage) -> Outcome<State> {
        forward(Stage::FetchingInput, event)
    }

    #[state]
    fn resolving_target(event: &Stage) -> Outcome<State> {
        forward(Stage::ResolvingTarget, event)
    }

    #[state]
    fn launching(event: &Stage) -> Outcome<State> {
        forward(Stage::Launching, event)
    }

    #[state]
    fn running(event: &Stage) -> Outcome<State> {
        forward(Stage::Running, event)
    }

    #[state]
    fn completed(event: &Stage) -> Outcome<State> {
        let _ = event;
        Handled
    }

    #[state]
    fn failed(event: &Stage) -> Outcome<State> {
        let _ = event;
        Handled
    }
}

/// Enforces stage ordering for one stream.
pub struct StageTracker {
    machine: StateMachine<StageOrder>,
}

impl std::fmt::Debug for StageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTracker")
            .field("current", &self.current())
            .finish()
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            machine: StageOrder.state_machine(),
        }
    }

    /// Last accepted stage.
    pub fn current(&self) -> Option<Stage> {
        stage_of(self.machine.state())
    }

    pub fn is_finished(&self) -> bool {
        self.current().map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Accept `stage` as the next record or reject it as out of order.
    pub fn accept(&mut self, stage: Stage) -> Result<(), StreamError> {
        let before = self.machine.state().clone();
        self.machine.handle(&stage);
        let after = self.machine.state();

        let entered = stage_of(after) == Some(stage);
        let repeated_running = stage == Stage::Running && before == *after;
        if entered && (before != *after || repeated_running) {
            return Ok(());
        }

        let from = stage_of(&before);
        warn!(from = ?from, to = %stage, "Rejected out-of-order stage event");
        Err(StreamError::OutOfOrder { from, to: stage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence_is_accepted() {
        let mut tracker = StageTracker::new();
        for stage in [
            Stage::Preparing,
            Stage::FetchingInput,
            Stage::ResolvingTarget,
            Stage::Launching,
            Stage::Running,
            Stage::Running,
            Stage::Completed,
        ] {
            tracker.accept(stage).unwrap();
        }
        assert!(tracker.is_finished());
    }

    #[test]
    fn test_resumed_stream_may_start_at_running() {
        let mut tracker = StageTracker::new();
        tracker.accept(Stage::Running).unwrap();
        tracker.accept(Stage::Failed).unwrap();
        assert_eq!(tracker.current(), Some(Stage::Failed));
    }

    #[test]
    fn test_backwards_and_post_terminal_records_rejected() {
        let mut tracker = StageTracker::new();
        tracker.accept(Stage::Launching).unwrap();
        assert!(tracker.accept(Stage::Preparing).is_err());
        assert!(tracker.accept(Stage::Launching).is_err());

        tracker.accept(Stage::Completed).unwrap();
        assert!(tracker.accept(Stage::Failed).is_err());
        assert!(tracker.accept(Stage::Running).is_err());
        assert_eq!(tracker.current(), Some(Stage::Completed));
    }
}
