pub mod capture;
pub mod errors;
pub mod hasher;
pub mod presence;
pub mod secret_service;
pub mod store;
pub mod workflow;

pub use errors::{AppError, AppResult};
pub use workflow::{
    Applicant, EnrollmentRequest, RejectionReason, Workflow, WorkflowBuilder, WorkflowOutcome,
    WorkflowState,
};
