use std::process::ExitCode;

use clap::Parser;
use facegate_cli::cli::{Cli, OutputMode};
use facegate_cli::commands::CommandHandler;
use facegate_cli::output::render_error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = cli.output_mode();
    init_tracing(cli.verbose, mode);

    let verbose = cli.verbose > 0;
    let handler: Box<dyn CommandHandler> = cli.command.into();
    handler.execute(mode, verbose).unwrap_or_else(|err| {
        render_error(&err, mode);
        err.exit_code()
    })
}

/// RUST_LOG wins; otherwise `-v` raises the level. JSON runs default to warnings only.
fn init_tracing(verbose: u8, mode: OutputMode) {
    let level = match (verbose, mode) {
        (0, OutputMode::Json) => "warn",
        (0, OutputMode::Human) => "info",
        (1, _) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    // Ignored when a subscriber is already installed.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
