// Budget-sliced run coordination and completion side effects

pub mod brief;
pub mod budget;
pub mod completion;
pub mod driver;
pub mod run_coordinator;

pub use brief::TaskBrief;
pub use budget::BudgetPolicy;
pub use completion::{
    extract_suggestions, normalize_suggestion, run_marker, CompletionHandler, CompletionReport,
};
pub use driver::{drive, DriveResult, RunDriver};
pub use run_coordinator::{AdvanceOutcome, LaunchRequest, RunCoordinator};
