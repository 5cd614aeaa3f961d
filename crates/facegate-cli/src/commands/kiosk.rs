use std::any::Any;
use std::process::ExitCode;

use crate::cli::{KioskArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::kiosk::{self, KioskSummary};
use crate::output::render_kiosk;

pub struct KioskHandler {
    args: KioskArgs,
    run: Box<dyn Fn(&KioskArgs) -> AppResult<KioskSummary> + Send + Sync>,
    render: Box<dyn Fn(&KioskSummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl KioskHandler {
    pub fn new(args: KioskArgs) -> Self {
        Self::with_dependencies(args, kiosk::run_kiosk, render_kiosk)
    }

    pub fn with_dependencies(
        args: KioskArgs,
        run: impl Fn(&KioskArgs) -> AppResult<KioskSummary> + Send + Sync + 'static,
        render: impl Fn(&KioskSummary, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for KioskHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.args)?;
        (self.render)(&summary, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
