use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod doctor;
mod enroll;
mod keyring;
mod kiosk;
mod schema;
mod verify;

pub use doctor::DoctorHandler;
pub use enroll::EnrollHandler;
pub use keyring::KeyringHandler;
pub use kiosk::KioskHandler;
pub use schema::SchemaHandler;
pub use verify::VerifyHandler;

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Verify(args) => Box::new(VerifyHandler::new(args)),
            Commands::Schema => Box::new(SchemaHandler::new()),
            Commands::Kiosk(args) => Box::new(KioskHandler::new(args)),
            Commands::Keyring(cmd) => Box::new(KeyringHandler::new(cmd)),
            Commands::Doctor => Box::new(DoctorHandler::new()),
        }
    }
}
