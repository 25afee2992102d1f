// Run records: one per (work item, agent kind) execution attempt

pub mod registry;
pub mod types;

pub use registry::{AgentProfile, AgentRegistry};
pub use types::{AgentKind, ExternalJobId, RunId, RunPatch, RunRecord, RunStatus};
