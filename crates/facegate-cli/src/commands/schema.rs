use std::any::Any;
use std::process::ExitCode;

use crate::cli::OutputMode;
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_schema;
use crate::session::{self, SchemaSummary};

pub struct SchemaHandler {
    run: Box<dyn Fn() -> AppResult<SchemaSummary> + Send + Sync>,
    render: Box<dyn Fn(&SchemaSummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl SchemaHandler {
    pub fn new() -> Self {
        Self::with_dependencies(session::run_schema, render_schema)
    }

    pub fn with_dependencies(
        run: impl Fn() -> AppResult<SchemaSummary> + Send + Sync + 'static,
        render: impl Fn(&SchemaSummary, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl Default for SchemaHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHandler for SchemaHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)()?;
        (self.render)(&summary, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
