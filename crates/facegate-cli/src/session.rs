use std::process::ExitCode;

use facegate_core::capture::FrameSource;
use facegate_core::presence::FaceDetector;
use facegate_core::store::{EnrollmentStore, RecordId};
use facegate_core::{Applicant, RejectionReason, Workflow, WorkflowOutcome};
use serde::Serialize;
use tracing::warn;

use crate::cli::{EnrollArgs, VerifyArgs};
use crate::config::{self, build_workflow, load_config};
use crate::errors::AppResult;

/// Result of a single enroll or verify run, as rendered to the operator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OperationSummary {
    pub operation: &'static str,
    pub success: bool,
    pub code: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    #[serde(skip)]
    pub rejection: Option<RejectionReason>,
}

impl OperationSummary {
    pub fn from_outcome(operation: &'static str, outcome: &WorkflowOutcome) -> Self {
        Self {
            operation,
            success: outcome.is_success(),
            code: outcome.code(),
            message: outcome.message(),
            record_id: outcome.record_id(),
            rejection: outcome.rejection(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.rejection {
            Some(reason) => reason.exit_code(),
            None => ExitCode::SUCCESS,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchemaSummary {
    pub location: String,
    pub records: u64,
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<OperationSummary> {
    let loaded = load_config()?;
    let mut source = config::frame_source(
        args.source.image.as_deref(),
        args.source.device.as_deref(),
        &loaded.resolved,
    )?;
    let mut workflow = build_workflow(&loaded.resolved)?;
    let summary = run_enroll_with(args, &mut workflow, &mut source);
    finish_session(summary, workflow)
}

pub fn run_enroll_with<D, S, F>(
    args: &EnrollArgs,
    workflow: &mut Workflow<D, S>,
    source: &mut F,
) -> AppResult<OperationSummary>
where
    D: FaceDetector,
    S: EnrollmentStore,
    F: FrameSource + ?Sized,
{
    let applicant = Applicant {
        name: args.name.clone(),
        identifier: args.identifier.clone(),
        phone: args.phone.clone(),
    };
    let outcome = workflow.capture_and_enroll(source, applicant)?;
    Ok(OperationSummary::from_outcome("enroll", &outcome))
}

pub fn run_verify(args: &VerifyArgs) -> AppResult<OperationSummary> {
    let loaded = load_config()?;
    let mut source = config::frame_source(
        args.source.image.as_deref(),
        args.source.device.as_deref(),
        &loaded.resolved,
    )?;
    let mut workflow = build_workflow(&loaded.resolved)?;
    let summary = run_verify_with(args, &mut workflow, &mut source);
    finish_session(summary, workflow)
}

pub fn run_verify_with<D, S, F>(
    args: &VerifyArgs,
    workflow: &mut Workflow<D, S>,
    source: &mut F,
) -> AppResult<OperationSummary>
where
    D: FaceDetector,
    S: EnrollmentStore,
    F: FrameSource + ?Sized,
{
    let outcome = workflow.capture_and_verify(source, args.identifier.as_deref())?;
    Ok(OperationSummary::from_outcome("verify", &outcome))
}

/// Closes the workflow and returns the operation's result. A failed close is
/// logged; it never replaces an outcome that was already committed.
pub fn finish_session<D, S>(
    summary: AppResult<OperationSummary>,
    workflow: Workflow<D, S>,
) -> AppResult<OperationSummary>
where
    D: FaceDetector,
    S: EnrollmentStore,
{
    if let Err(err) = workflow.shutdown() {
        warn!(error = %err, "enrollment store did not close cleanly");
    }
    summary
}

/// Ensures the table exists without needing a detector or fingerprint key.
pub fn run_schema() -> AppResult<SchemaSummary> {
    let loaded = load_config()?;
    let store = config::open_store(&loaded.resolved)?;
    store.ensure_schema()?;
    let summary = SchemaSummary {
        location: store.location().display(),
        records: store.count()?,
    };
    store.close()?;
    Ok(summary)
}
