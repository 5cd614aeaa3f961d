//! Enrollment and verification state machine.
//!
//! A [`Workflow`] owns its collaborators (presence gate, hasher, optional
//! fingerprinter and store) and runs one operation at a time. Expected
//! rejections come back as [`WorkflowOutcome::Rejected`]; only system faults are
//! returned as [`AppError`].

use std::fmt;
use std::process::ExitCode;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::capture::FrameSource;
use crate::errors::{AppError, AppResult};
use crate::hasher::{IdentifierFingerprinter, IdentifierHasher};
use crate::presence::{FaceDetector, PresenceGate};
use crate::store::{EnrollmentRecord, EnrollmentStore, InsertOutcome, NewEnrollment, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Capturing,
    Detecting,
    Enrolling,
    Verifying,
    Success,
    Rejected,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Success | WorkflowState::Rejected | WorkflowState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NoFaceDetected,
    DuplicateIdentifier,
    CaptureAborted,
    NotEnrolled,
}

impl RejectionReason {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RejectionReason::NoFaceDetected => ExitCode::from(10),
            RejectionReason::DuplicateIdentifier => ExitCode::from(11),
            RejectionReason::CaptureAborted => ExitCode::from(12),
            RejectionReason::NotEnrolled => ExitCode::from(13),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Enrolled { record_id: RecordId },
    AccessGranted { record_id: Option<RecordId> },
    Rejected(RejectionReason),
}

impl WorkflowOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowOutcome::Enrolled { .. } => "enrolled",
            WorkflowOutcome::AccessGranted { .. } => "access_granted",
            WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected) => "no_face_detected",
            WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier) => {
                "already_registered"
            }
            WorkflowOutcome::Rejected(RejectionReason::CaptureAborted) => "capture_aborted",
            WorkflowOutcome::Rejected(RejectionReason::NotEnrolled) => "not_enrolled",
        }
    }

    /// User-facing text. The duplicate case never names the colliding field.
    pub fn message(&self) -> &'static str {
        match self {
            WorkflowOutcome::Enrolled { .. } => "Enrollment complete.",
            WorkflowOutcome::AccessGranted { .. } => "Access granted.",
            WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected) => {
                "No face detected. Look at the camera and try again."
            }
            WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier) => {
                "This person is already registered."
            }
            WorkflowOutcome::Rejected(RejectionReason::CaptureAborted) => "Capture cancelled.",
            WorkflowOutcome::Rejected(RejectionReason::NotEnrolled) => {
                "Access denied: no matching enrollment."
            }
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, WorkflowOutcome::Rejected(_))
    }

    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            WorkflowOutcome::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            WorkflowOutcome::Enrolled { record_id } => Some(*record_id),
            WorkflowOutcome::AccessGranted { record_id } => *record_id,
            WorkflowOutcome::Rejected(_) => None,
        }
    }
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Personal details collected by the front end before a still is available.
#[derive(Clone, PartialEq, Eq)]
pub struct Applicant {
    pub name: String,
    pub identifier: String,
    pub phone: Option<String>,
}

impl fmt::Debug for Applicant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Applicant")
            .field("name", &self.name)
            .field("phone", &self.phone)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub applicant: Applicant,
    pub image: Vec<u8>,
}

impl EnrollmentRequest {
    pub fn new(
        name: impl Into<String>,
        identifier: impl Into<String>,
        phone: Option<String>,
        image: Vec<u8>,
    ) -> Self {
        Self {
            applicant: Applicant {
                name: name.into(),
                identifier: identifier.into(),
                phone,
            },
            image,
        }
    }
}

pub struct WorkflowBuilder<D, S> {
    gate: PresenceGate<D>,
    store: S,
    hasher: IdentifierHasher,
    fingerprinter: Option<IdentifierFingerprinter>,
    store_images: bool,
}

impl<D: FaceDetector, S: EnrollmentStore> WorkflowBuilder<D, S> {
    pub fn new(gate: PresenceGate<D>, store: S) -> Self {
        Self {
            gate,
            store,
            hasher: IdentifierHasher::default(),
            fingerprinter: None,
            store_images: true,
        }
    }

    pub fn hasher(mut self, hasher: IdentifierHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Enables deduplication on the deterministic keyed fingerprint.
    pub fn fingerprinter(mut self, fingerprinter: Option<IdentifierFingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn store_images(mut self, enabled: bool) -> Self {
        self.store_images = enabled;
        self
    }

    /// Ensures the schema exists and hands back an idle workflow.
    pub fn build(self) -> AppResult<Workflow<D, S>> {
        self.store.ensure_schema()?;
        if self.fingerprinter.is_some() {
            let legacy = self.store.unfingerprinted_digests()?.len();
            if legacy > 0 {
                warn!(
                    records = legacy,
                    "store holds records without a fingerprint; duplicate checks scan their digests"
                );
            }
        }
        debug!(
            fingerprint_dedup = self.fingerprinter.is_some(),
            store_images = self.store_images,
            "workflow ready"
        );
        Ok(Workflow {
            gate: self.gate,
            hasher: self.hasher,
            fingerprinter: self.fingerprinter,
            store: self.store,
            store_images: self.store_images,
            state: WorkflowState::Idle,
            last_terminal: None,
        })
    }
}

pub struct Workflow<D, S> {
    gate: PresenceGate<D>,
    hasher: IdentifierHasher,
    fingerprinter: Option<IdentifierFingerprinter>,
    store: S,
    store_images: bool,
    state: WorkflowState,
    last_terminal: Option<WorkflowState>,
}

impl<D: FaceDetector, S: EnrollmentStore> Workflow<D, S> {
    pub fn builder(gate: PresenceGate<D>, store: S) -> WorkflowBuilder<D, S> {
        WorkflowBuilder::new(gate, store)
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Terminal state reached by the most recent operation.
    pub fn last_terminal(&self) -> Option<WorkflowState> {
        self.last_terminal
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn enroll(&mut self, request: EnrollmentRequest) -> AppResult<WorkflowOutcome> {
        let span = info_span!("enroll", operation_id = %Uuid::new_v4());
        let _guard = span.enter();

        let result = validate_applicant(&request.applicant)
            .and_then(|()| self.enroll_captured(&request.applicant, request.image));
        self.finish(result)
    }

    pub fn capture_and_enroll<F: FrameSource + ?Sized>(
        &mut self,
        source: &mut F,
        applicant: Applicant,
    ) -> AppResult<WorkflowOutcome> {
        let span = info_span!("enroll", operation_id = %Uuid::new_v4());
        let _guard = span.enter();

        let result = validate_applicant(&applicant).and_then(|()| {
            self.transition(WorkflowState::Capturing);
            match source.acquire_frame()? {
                Some(frame) => self.enroll_captured(&applicant, frame.bytes),
                None => Ok(WorkflowOutcome::Rejected(RejectionReason::CaptureAborted)),
            }
        });
        self.finish(result)
    }

    /// Presence check, optionally bound to a claimed identifier.
    pub fn verify(
        &mut self,
        image: &[u8],
        identifier: Option<&str>,
    ) -> AppResult<WorkflowOutcome> {
        let span = info_span!("verify", operation_id = %Uuid::new_v4());
        let _guard = span.enter();

        let result = validate_claim(identifier).and_then(|claim| self.verify_captured(image, claim));
        self.finish(result)
    }

    pub fn capture_and_verify<F: FrameSource + ?Sized>(
        &mut self,
        source: &mut F,
        identifier: Option<&str>,
    ) -> AppResult<WorkflowOutcome> {
        let span = info_span!("verify", operation_id = %Uuid::new_v4());
        let _guard = span.enter();

        let result = validate_claim(identifier).and_then(|claim| {
            self.transition(WorkflowState::Capturing);
            match source.acquire_frame()? {
                Some(frame) => self.verify_captured(&frame.bytes, claim),
                None => Ok(WorkflowOutcome::Rejected(RejectionReason::CaptureAborted)),
            }
        });
        self.finish(result)
    }

    /// Releases the storage connection.
    pub fn shutdown(self) -> AppResult<()> {
        debug!("workflow shutting down");
        self.store.close()
    }

    fn enroll_captured(
        &mut self,
        applicant: &Applicant,
        image: Vec<u8>,
    ) -> AppResult<WorkflowOutcome> {
        self.transition(WorkflowState::Detecting);
        let presence = self.gate.check(&image)?;
        if !presence.present {
            return Ok(WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected));
        }

        self.transition(WorkflowState::Enrolling);
        let identifier_hash = self.hasher.hash(&applicant.identifier)?;
        let identifier_fingerprint = self
            .fingerprinter
            .as_ref()
            .map(|fingerprinter| fingerprinter.fingerprint(&applicant.identifier))
            .transpose()?;

        let record = NewEnrollment {
            name: applicant.name.trim().to_string(),
            identifier_hash,
            identifier_fingerprint,
            phone: applicant
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|phone| !phone.is_empty())
                .map(str::to_string),
            image: self.store_images.then_some(image),
            enrolled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        if self.fingerprinter.is_some()
            && self.match_unfingerprinted(&applicant.identifier)?.is_some()
        {
            return Ok(WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier));
        }

        match self.store.insert(&record)? {
            InsertOutcome::Inserted(record_id) => Ok(WorkflowOutcome::Enrolled { record_id }),
            InsertOutcome::DuplicateIdentifier => {
                Ok(WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier))
            }
        }
    }

    fn verify_captured(&mut self, image: &[u8], claim: Option<&str>) -> AppResult<WorkflowOutcome> {
        self.transition(WorkflowState::Detecting);
        let presence = self.gate.check(image)?;
        if !presence.present {
            return Ok(WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected));
        }

        self.transition(WorkflowState::Verifying);
        let Some(identifier) = claim else {
            return Ok(WorkflowOutcome::AccessGranted { record_id: None });
        };

        match self.lookup(identifier)? {
            Some(record) => Ok(WorkflowOutcome::AccessGranted {
                record_id: Some(record.id),
            }),
            None => Ok(WorkflowOutcome::Rejected(RejectionReason::NotEnrolled)),
        }
    }

    fn lookup(&self, identifier: &str) -> AppResult<Option<EnrollmentRecord>> {
        if let Some(fingerprinter) = &self.fingerprinter {
            let fingerprint = fingerprinter.fingerprint(identifier)?;
            return match self.store.find_by_fingerprint(&fingerprint)? {
                Some(record) if self.hasher.matches(identifier, &record.identifier_hash)? => {
                    Ok(Some(record))
                }
                Some(_) => Ok(None),
                None => self.match_unfingerprinted(identifier),
            };
        }

        self.scan_digests(identifier, self.store.digests()?)
    }

    /// Rows written under salted-digest dedup carry no fingerprint and are
    /// only reachable by digest comparison.
    fn match_unfingerprinted(&self, identifier: &str) -> AppResult<Option<EnrollmentRecord>> {
        self.scan_digests(identifier, self.store.unfingerprinted_digests()?)
    }

    fn scan_digests(
        &self,
        identifier: &str,
        digests: Vec<(RecordId, String)>,
    ) -> AppResult<Option<EnrollmentRecord>> {
        for (_, digest) in digests {
            if self.hasher.matches(identifier, &digest)? {
                return self.store.find_by_hash(&digest);
            }
        }
        Ok(None)
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!(from = ?self.state, to = ?next, "workflow transition");
        self.state = next;
    }

    fn finish(&mut self, result: AppResult<WorkflowOutcome>) -> AppResult<WorkflowOutcome> {
        let terminal = match &result {
            Ok(WorkflowOutcome::Rejected(reason)) => {
                warn!(reason = ?reason, "operation rejected");
                WorkflowState::Rejected
            }
            Ok(outcome) => {
                info!(code = outcome.code(), record_id = ?outcome.record_id(), "operation succeeded");
                WorkflowState::Success
            }
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "operation failed");
                WorkflowState::Failed
            }
        };
        self.transition(terminal);
        self.last_terminal = Some(terminal);
        self.transition(WorkflowState::Idle);
        result
    }
}

impl<D, S> fmt::Debug for Workflow<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("state", &self.state)
            .field("last_terminal", &self.last_terminal)
            .field("fingerprint_dedup", &self.fingerprinter.is_some())
            .field("store_images", &self.store_images)
            .finish_non_exhaustive()
    }
}

fn validate_applicant(applicant: &Applicant) -> AppResult<()> {
    if applicant.name.trim().is_empty() {
        return Err(AppError::InvalidInput {
            field: "name",
            message: "name cannot be empty".into(),
        });
    }
    if applicant.identifier.trim().is_empty() {
        return Err(AppError::EmptyIdentifier);
    }
    Ok(())
}

fn validate_claim(identifier: Option<&str>) -> AppResult<Option<&str>> {
    match identifier {
        Some(value) if value.trim().is_empty() => Err(AppError::EmptyIdentifier),
        other => Ok(other),
    }
}
