use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    version,
    about = "Presence-gated enrollment and verification"
)]
pub struct Cli {
    /// Emit single-line JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Enroll a person after confirming a face is present
    Enroll(EnrollArgs),
    /// Check presence, optionally against an enrolled identifier
    Verify(VerifyArgs),
    /// Create the enrollment table if it does not exist
    Schema,
    /// Interactive console front end
    Kiosk(KioskArgs),
    /// Secret Service fingerprint key management
    #[command(subcommand)]
    Keyring(KeyringCommands),
    /// Diagnose configuration, storage, key and device readiness
    Doctor,
}

#[derive(Debug, Clone, Args)]
#[group(id = "still", required = true, multiple = false)]
pub struct StillSourceArgs {
    /// Encoded still image (PNG, JPEG)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Capture from a video device (index or path)
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Display name
    #[arg(long)]
    pub name: String,

    /// Personal identifier; only its digest is stored
    #[arg(long)]
    pub identifier: String,

    /// Optional contact number
    #[arg(long)]
    pub phone: Option<String>,

    #[command(flatten)]
    pub source: StillSourceArgs,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// Claimed identifier to look up after the presence check
    #[arg(long)]
    pub identifier: Option<String>,

    #[command(flatten)]
    pub source: StillSourceArgs,
}

#[derive(Debug, Clone, Args)]
pub struct KioskArgs {
    /// Video device (index or path); defaults to config video_device
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum KeyringCommands {
    /// Verify the Secret Service is reachable
    Check,
    /// Generate and store a fingerprint key if none exists
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_requires_exactly_one_still_source() {
        let parsed = Cli::try_parse_from([
            "facegate", "enroll", "--name", "Ana", "--identifier", "111", "--image", "a.png",
        ])
        .unwrap();
        match parsed.command {
            Commands::Enroll(args) => {
                assert_eq!(args.source.image, Some(PathBuf::from("a.png")));
                assert!(args.phone.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["facegate", "enroll", "--name", "Ana", "--identifier", "1"])
            .is_err());
        assert!(Cli::try_parse_from([
            "facegate", "verify", "--image", "a.png", "--device", "0",
        ])
        .is_err());
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let parsed =
            Cli::try_parse_from(["facegate", "keyring", "check", "--json", "-vv"]).unwrap();
        assert_eq!(parsed.output_mode(), OutputMode::Json);
        assert_eq!(parsed.verbose, 2);
        assert!(matches!(
            parsed.command,
            Commands::Keyring(KeyringCommands::Check)
        ));
    }
}
