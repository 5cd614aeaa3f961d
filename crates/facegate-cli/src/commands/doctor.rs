use std::any::Any;
use std::process::ExitCode;

use crate::cli::OutputMode;
use crate::commands::CommandHandler;
use crate::doctor::{self, DoctorOutcome};
use crate::errors::AppResult;
use crate::output::render_doctor;

type DoctorRun = Box<dyn Fn() -> AppResult<DoctorOutcome> + Send + Sync>;
type DoctorRender = Box<dyn Fn(&DoctorOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>;

/// Runs every health check; the outcome is rendered even when checks fail.
pub struct DoctorHandler {
    run: DoctorRun,
    render: DoctorRender,
}

impl DoctorHandler {
    pub fn new() -> Self {
        Self::with_dependencies(doctor::run_doctor, render_doctor)
    }

    pub fn with_dependencies(
        run: impl Fn() -> AppResult<DoctorOutcome> + Send + Sync + 'static,
        render: impl Fn(&DoctorOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl Default for DoctorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHandler for DoctorHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)()?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(outcome.exit_code())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
