use std::any::Any;
use std::process::ExitCode;

use crate::cli::{EnrollArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_operation;
use crate::session::{self, OperationSummary};

pub struct EnrollHandler {
    args: EnrollArgs,
    run: Box<dyn Fn(&EnrollArgs) -> AppResult<OperationSummary> + Send + Sync>,
    render: Box<dyn Fn(&OperationSummary, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl EnrollHandler {
    pub fn new(args: EnrollArgs) -> Self {
        Self::with_dependencies(args, session::run_enroll, render_operation)
    }

    pub fn with_dependencies(
        args: EnrollArgs,
        run: impl Fn(&EnrollArgs) -> AppResult<OperationSummary> + Send + Sync + 'static,
        render: impl Fn(&OperationSummary, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for EnrollHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.args)?;
        (self.render)(&summary, mode, verbose)?;
        Ok(summary.exit_code())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
