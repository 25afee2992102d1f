// Boundary to the external execution service

pub mod http;
pub mod service;
pub mod translate;

pub use http::HttpExecutionService;
pub use service::{
    ExecutionService, JobFailure, JobHandle, JobRequest, JobSnapshot, JobState, ServiceError,
};
#[cfg(any(test, feature = "testing"))]
pub use service::MockExecutionService;
pub use translate::{ErrorCategory, ErrorTranslator};
