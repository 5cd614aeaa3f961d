use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

use crate::secret_service::{FingerprintKeyLookupError, SecretServiceError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("image is empty or could not be decoded: {message}")]
    InvalidImage { message: String },

    #[error("identifier cannot be empty")]
    EmptyIdentifier,

    #[error("stored identifier digest is malformed: {message}")]
    MalformedDigest { message: String },

    #[error("invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("enrollment storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("enrollment storage error: {0}")]
    Storage(String),

    #[error("missing configuration: {what}; {hint}")]
    ConfigurationMissing {
        what: &'static str,
        hint: &'static str,
    },

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("identifier hashing failed: {0}")]
    Hashing(String),

    #[error("identifier fingerprinting failed: {0}")]
    Fingerprint(String),

    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("face detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("failed to open video device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("device capability error: {0}")]
    Capability(String),

    #[error("unsupported pixel format '{0}' for selected device")]
    UnsupportedFormat(String),

    #[error("failed processing frame data: {0}")]
    FrameProcessing(String),

    #[error("Secret Service unavailable for entry {entry} (service {service}): {message}")]
    SecretServiceUnavailable {
        entry: String,
        service: String,
        message: String,
    },

    #[error("fingerprint key from {entry} is invalid: {message}")]
    SecretServiceKeyInvalid { entry: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// 2: bad input or configuration, 3: storage or capability, 4: device, 1: other.
    pub fn exit_code(&self) -> ExitCode {
        let code = match self {
            AppError::InvalidImage { .. }
            | AppError::EmptyIdentifier
            | AppError::InvalidInput { .. }
            | AppError::MissingInput { .. }
            | AppError::ConfigurationMissing { .. }
            | AppError::ConfigRead { .. }
            | AppError::ConfigParse { .. }
            | AppError::DetectorUnavailable(_)
            | AppError::ModelLoad { .. }
            | AppError::UnsupportedFormat(_)
            | AppError::SecretServiceUnavailable { .. }
            | AppError::SecretServiceKeyInvalid { .. } => 2,
            AppError::StorageUnavailable { .. }
            | AppError::MalformedDigest { .. }
            | AppError::Capability(_) => 3,
            AppError::DeviceOpen { .. } => 4,
            _ => 1,
        };
        ExitCode::from(code)
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }

    /// Transient faults a caller may retry without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable { .. })
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<SecretServiceError> for AppError {
    fn from(err: SecretServiceError) -> Self {
        AppError::SecretServiceUnavailable {
            entry: err.entry().to_string(),
            service: err.service().to_string(),
            message: err.message().to_string(),
        }
    }
}

impl From<FingerprintKeyLookupError> for AppError {
    fn from(err: FingerprintKeyLookupError) -> Self {
        match err {
            FingerprintKeyLookupError::SecretService(inner) => inner.into(),
            FingerprintKeyLookupError::InvalidFormat { entry, reason } => {
                AppError::SecretServiceKeyInvalid {
                    entry,
                    message: reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_unavailable_is_retryable() {
        let transient = AppError::StorageUnavailable {
            message: "database is locked".into(),
        };
        assert!(transient.is_retryable());
        assert!(!AppError::EmptyIdentifier.is_retryable());
        assert!(!AppError::Storage("bad row".into()).is_retryable());
    }

    #[test]
    fn configuration_missing_uses_input_exit_code() {
        let err = AppError::ConfigurationMissing {
            what: "database connection string",
            hint: "set FACEGATE_DATABASE_URL",
        };
        assert_eq!(err.exit_code(), ExitCode::from(2));
        assert!(err.human_message().contains("FACEGATE_DATABASE_URL"));
    }
}
