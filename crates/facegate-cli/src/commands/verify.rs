use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, VerifyArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_operation;
use crate::session::{self, OperationSummary};

pub struct VerifyHandler {
    args: VerifyArgs,
    run: Box<dyn Fn(&VerifyArgs) -> AppResult<OperationSummary> + Send + Sync>,
    render: Box<dyn Fn(&OperationSummary, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl VerifyHandler {
    pub fn new(args: VerifyArgs) -> Self {
        Self::with_dependencies(args, session::run_verify, render_operation)
    }

    pub fn with_dependencies(
        args: VerifyArgs,
        run: impl Fn(&VerifyArgs) -> AppResult<OperationSummary> + Send + Sync + 'static,
        render: impl Fn(&OperationSummary, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for VerifyHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.args)?;
        (self.render)(&summary, mode, verbose)?;
        Ok(summary.exit_code())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
