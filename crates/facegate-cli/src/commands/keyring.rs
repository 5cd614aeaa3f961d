use std::any::Any;
use std::process::ExitCode;

use crate::cli::{KeyringCommands, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::keyring::{self, KeyringSummary};
use crate::output::render_keyring;

pub struct KeyringHandler {
    command: KeyringCommands,
    run: Box<dyn Fn(&KeyringCommands) -> AppResult<KeyringSummary> + Send + Sync>,
    render: Box<dyn Fn(&KeyringSummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl KeyringHandler {
    pub fn new(command: KeyringCommands) -> Self {
        Self::with_dependencies(command, default_run, render_keyring)
    }

    pub fn with_dependencies(
        command: KeyringCommands,
        run: impl Fn(&KeyringCommands) -> AppResult<KeyringSummary> + Send + Sync + 'static,
        render: impl Fn(&KeyringSummary, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            command,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for KeyringHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.command)?;
        (self.render)(&summary, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn default_run(command: &KeyringCommands) -> AppResult<KeyringSummary> {
    match command {
        KeyringCommands::Check => keyring::run_keyring_check(),
        KeyringCommands::Init => keyring::run_keyring_init(),
    }
}
