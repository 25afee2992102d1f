// Lanekeeper Library - ticket pipeline orchestration with resumable agent runs
// This exposes the core components for testing and integration

pub mod board;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod endpoints;
pub mod errors;
pub mod events;
pub mod external;
pub mod persistence;
pub mod runs;
pub mod signals;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export key types for easy access
pub use board::{
    BoardLayout, BoardStateMachine, ColumnId, IdAllocator, ItemId, MoveOutcome, NewWorkItem,
    Trigger, UnchangedReason, WorkItem,
};
pub use config::LanekeeperConfig;
pub use coordinator::{AdvanceOutcome, BudgetPolicy, LaunchRequest, RunCoordinator, RunDriver};
pub use endpoints::{advance, launch_and_stream, AdvanceRequest, AdvanceResponse};
pub use errors::OrchestratorError;
pub use events::{Stage, StageEvent, StageSink, StageStream};
pub use external::{ExecutionService, HttpExecutionService};
pub use persistence::{FileJournal, ProjectJournal};
pub use runs::{AgentKind, AgentRegistry, RunId, RunRecord, RunStatus};
pub use signals::{BoardSignal, SignalBus, SignalConsumer};
pub use store::{ContentStore, MemoryStore, SharedStore};
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
