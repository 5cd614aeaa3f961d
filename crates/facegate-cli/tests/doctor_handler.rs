use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facegate_cli::cli::OutputMode;
use facegate_cli::commands::{CommandHandler, DoctorHandler};
use facegate_cli::doctor::{CheckStatus, DoctorCheck, DoctorOutcome};
use facegate_cli::errors::AppError;

fn check(name: &str, status: CheckStatus) -> DoctorCheck {
    DoctorCheck {
        name: name.into(),
        status,
        message: format!("{name} probed"),
        path: None,
        device: None,
    }
}

fn outcome(checks: Vec<DoctorCheck>) -> DoctorOutcome {
    DoctorOutcome {
        ok: checks.iter().all(|c| c.status != CheckStatus::Fail),
        checks,
    }
}

#[test]
fn failing_check_renders_once_and_exits_one() {
    let renders = Arc::new(Mutex::new(Vec::new()));
    let handler = DoctorHandler::with_dependencies(
        || {
            Ok(outcome(vec![
                check("config", CheckStatus::Pass),
                check("database", CheckStatus::Fail),
            ]))
        },
        {
            let renders = Arc::clone(&renders);
            move |outcome, _mode, verbose| {
                renders
                    .lock()
                    .unwrap()
                    .push((outcome.count(CheckStatus::Fail), verbose));
                Ok(())
            }
        },
    );

    let code = handler.execute(OutputMode::Human, true).unwrap();
    assert_eq!(code, ExitCode::from(1));
    assert_eq!(*renders.lock().unwrap(), vec![(1, true)]);
}

#[test]
fn warnings_alone_exit_successfully() {
    let handler = DoctorHandler::with_dependencies(
        || {
            Ok(outcome(vec![
                check("database", CheckStatus::Pass),
                check("video_device", CheckStatus::Warn),
            ]))
        },
        |_outcome, _mode, _verbose| Ok(()),
    );
    assert_eq!(
        handler.execute(OutputMode::Json, false).unwrap(),
        ExitCode::SUCCESS
    );
}

#[test]
fn run_errors_skip_rendering() {
    let renders = Arc::new(Mutex::new(0));
    let handler = DoctorHandler::with_dependencies(
        || {
            Err(AppError::ConfigurationMissing {
                what: "database connection string",
                hint: "set FACEGATE_DATABASE_URL",
            })
        },
        {
            let renders = Arc::clone(&renders);
            move |_outcome, _mode, _verbose| {
                *renders.lock().unwrap() += 1;
                Ok(())
            }
        },
    );

    let err = handler.execute(OutputMode::Json, false).unwrap_err();
    assert!(matches!(err, AppError::ConfigurationMissing { .. }));
    assert_eq!(*renders.lock().unwrap(), 0);
}
