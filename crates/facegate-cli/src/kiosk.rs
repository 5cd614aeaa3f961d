//! Interactive console front end.
//!
//! Menu: `1` enroll, `2` verify, `3` exit. Before each capture the operator
//! confirms with `C` or cancels with `Q`; cancelling yields a capture-aborted
//! rejection rather than an error.

use std::io::{self, BufRead, Write};

use facegate_core::capture::{CapturedImage, FrameSource};
use facegate_core::presence::FaceDetector;
use facegate_core::store::EnrollmentStore;
use facegate_core::{Applicant, Workflow, WorkflowOutcome};
use serde::Serialize;
use tracing::warn;

use crate::cli::KioskArgs;
use crate::config::{self, build_workflow, load_config};
use crate::errors::AppResult;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct KioskSummary {
    pub enrolled: usize,
    pub granted: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl KioskSummary {
    fn record(&mut self, outcome: &AppResult<WorkflowOutcome>) {
        match outcome {
            Ok(WorkflowOutcome::Enrolled { .. }) => self.enrolled += 1,
            Ok(WorkflowOutcome::AccessGranted { .. }) => self.granted += 1,
            Ok(WorkflowOutcome::Rejected(_)) => self.rejected += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Wraps a frame source with an operator confirmation prompt.
pub struct PromptingFrameSource<'a, R, W, F: ?Sized> {
    input: &'a mut R,
    output: &'a mut W,
    inner: &'a mut F,
}

impl<'a, R, W, F> PromptingFrameSource<'a, R, W, F>
where
    R: BufRead,
    W: Write,
    F: FrameSource + ?Sized,
{
    pub fn new(input: &'a mut R, output: &'a mut W, inner: &'a mut F) -> Self {
        Self {
            input,
            output,
            inner,
        }
    }
}

impl<R, W, F> FrameSource for PromptingFrameSource<'_, R, W, F>
where
    R: BufRead,
    W: Write,
    F: FrameSource + ?Sized,
{
    fn acquire_frame(&mut self) -> AppResult<Option<CapturedImage>> {
        loop {
            write!(self.output, "Face the camera. [C] capture, [Q] cancel: ")?;
            self.output.flush()?;
            let Some(answer) = read_line(self.input)? else {
                return Ok(None);
            };
            match answer.to_ascii_lowercase().as_str() {
                "c" | "" => return self.inner.acquire_frame(),
                "q" => return Ok(None),
                _ => writeln!(self.output, "Please answer C or Q.")?,
            }
        }
    }
}

pub fn run_kiosk(args: &KioskArgs) -> AppResult<KioskSummary> {
    let loaded = load_config()?;
    let mut source = config::frame_source(None, args.device.as_deref(), &loaded.resolved)?;
    let workflow = build_workflow(&loaded.resolved)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    run_kiosk_with(workflow, &mut source, &mut input, &mut output)
}

/// Runs the menu loop until `3` or end of input, then shuts the workflow down.
pub fn run_kiosk_with<D, S, F, R, W>(
    mut workflow: Workflow<D, S>,
    source: &mut F,
    input: &mut R,
    output: &mut W,
) -> AppResult<KioskSummary>
where
    D: FaceDetector,
    S: EnrollmentStore,
    F: FrameSource + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut summary = KioskSummary::default();

    loop {
        writeln!(output)?;
        writeln!(output, "1) Enroll")?;
        writeln!(output, "2) Verify")?;
        writeln!(output, "3) Exit")?;
        write!(output, "> ")?;
        output.flush()?;

        let Some(choice) = read_line(input)? else {
            break;
        };

        let outcome = match choice.as_str() {
            "1" => {
                let Some(applicant) = prompt_applicant(input, output)? else {
                    break;
                };
                let mut prompting = PromptingFrameSource::new(input, output, source);
                workflow.capture_and_enroll(&mut prompting, applicant)
            }
            "2" => {
                let mut prompting = PromptingFrameSource::new(input, output, source);
                workflow.capture_and_verify(&mut prompting, None)
            }
            "3" => break,
            _ => {
                writeln!(output, "Unknown option.")?;
                continue;
            }
        };

        summary.record(&outcome);
        match &outcome {
            Ok(result) => writeln!(output, "{}", result.message())?,
            Err(err) => {
                warn!(error = %err, "kiosk operation failed");
                writeln!(output, "Error: {}", err.human_message())?;
                if err.is_retryable() {
                    writeln!(output, "The store is busy; please try again.")?;
                }
            }
        }
    }

    if let Err(err) = workflow.shutdown() {
        warn!(error = %err, "enrollment store did not close cleanly");
    }
    writeln!(output, "Goodbye.")?;
    Ok(summary)
}

fn prompt_applicant<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> AppResult<Option<Applicant>> {
    let Some(name) = prompt(input, output, "Name: ")? else {
        return Ok(None);
    };
    let Some(identifier) = prompt(input, output, "Identifier: ")? else {
        return Ok(None);
    };
    let Some(phone) = prompt(input, output, "Phone (optional): ")? else {
        return Ok(None);
    };
    Ok(Some(Applicant {
        name,
        identifier,
        phone: (!phone.is_empty()).then_some(phone),
    }))
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
) -> AppResult<Option<String>> {
    write!(output, "{label}")?;
    output.flush()?;
    read_line(input)
}

/// `None` on end of input.
fn read_line<R: BufRead>(input: &mut R) -> AppResult<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
