use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::doctor::{CheckStatus, DoctorOutcome};
use crate::errors::{AppError, AppResult};
use crate::keyring::KeyringSummary;
use crate::kiosk::KioskSummary;
use crate::session::{OperationSummary, SchemaSummary};

fn write_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(value)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_operation(
    summary: &OperationSummary,
    mode: OutputMode,
    verbose: bool,
) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("{}", summary.message);
            if verbose {
                if let Some(id) = summary.record_id {
                    println!("Record: {id}");
                }
                println!("Outcome: {}", summary.code);
            }
        }
        OutputMode::Json => write_json(summary)?,
    }
    Ok(())
}

pub fn render_schema(summary: &SchemaSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("Schema ready: {}", summary.location);
            println!("Enrollments stored: {}", summary.records);
        }
        OutputMode::Json => write_json(&json!({
            "status": "ok",
            "location": summary.location,
            "records": summary.records,
        }))?,
    }
    Ok(())
}

pub fn render_keyring(summary: &KeyringSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => match summary {
            KeyringSummary::Check(check) => {
                println!(
                    "Secret Service available for entry '{}' (service '{}')",
                    check.entry, check.service
                );
            }
            KeyringSummary::Init(init) if init.created => {
                println!(
                    "Fingerprint key stored in entry '{}' (service '{}')",
                    init.entry, init.service
                );
            }
            KeyringSummary::Init(init) => {
                println!(
                    "Fingerprint key already present in entry '{}'; left unchanged",
                    init.entry
                );
            }
        },
        OutputMode::Json => write_json(summary)?,
    }
    Ok(())
}

/// Passing checks are listed only when `verbose`; warnings and failures always are.
pub fn render_doctor(outcome: &DoctorOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for check in &outcome.checks {
                let label = match check.status {
                    CheckStatus::Pass if !verbose => continue,
                    CheckStatus::Pass => "ok",
                    CheckStatus::Warn => "warn",
                    CheckStatus::Fail => "FAIL",
                };
                let detail = check.path.as_deref().or(check.device.as_deref());
                match detail {
                    Some(detail) => println!("{label:>4}  {}: {} [{detail}]", check.name, check.message),
                    None => println!("{label:>4}  {}: {}", check.name, check.message),
                }
            }
            println!(
                "{} passed, {} warning(s), {} failed",
                outcome.count(CheckStatus::Pass),
                outcome.count(CheckStatus::Warn),
                outcome.count(CheckStatus::Fail)
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_kiosk(summary: &KioskSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Session closed: {} enrolled, {} granted, {} rejected, {} failed",
                summary.enrolled, summary.granted, summary.rejected, summary.failed
            );
        }
        OutputMode::Json => write_json(summary)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
            if err.is_retryable() {
                eprintln!("hint: the enrollment store is busy; retry shortly");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
                "retryable": err.is_retryable(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{RejectionReason, WorkflowOutcome};

    #[test]
    fn operation_json_omits_missing_record_id() {
        let summary = OperationSummary::from_outcome(
            "enroll",
            &WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier),
        );
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["code"], "already_registered");
        assert_eq!(value["success"], false);
        assert!(value.get("record_id").is_none());
        assert!(value.get("rejection").is_none());
    }

    #[test]
    fn keyring_json_is_tagged_by_action() {
        let summary = KeyringSummary::Init(crate::keyring::KeyringInitSummary {
            service: "facegate".into(),
            entry: "fingerprint-key".into(),
            created: true,
        });
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["action"], "init");
        assert_eq!(value["created"], true);
    }
}
