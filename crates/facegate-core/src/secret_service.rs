use base64::{engine::general_purpose, Engine as _};
use keyring::{error::Error as KeyringError, Entry};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

const DEFAULT_SERVICE_NAME: &str = "facegate";
const FINGERPRINT_KEY_ENTRY: &str = "fingerprint-key";
pub const FINGERPRINT_KEY_BYTES: usize = 32;

#[derive(Debug, Error, Clone)]
#[error("Secret Service unavailable for entry '{entry}' (service '{service}'): {message}")]
pub struct SecretServiceError {
    entry: String,
    service: String,
    message: String,
}

impl SecretServiceError {
    pub fn new(
        entry: impl Into<String>,
        service: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entry: entry.into(),
            service: service.into(),
            message: message.into(),
        }
    }

    /// Error against the fingerprint key entry of the default service.
    fn for_key_entry(message: impl Into<String>) -> Self {
        Self::new(FINGERPRINT_KEY_ENTRY, DEFAULT_SERVICE_NAME, message)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub trait SecretServiceProbe {
    fn check(&self) -> Result<(), SecretServiceError>;
}

#[derive(Debug, Clone)]
pub enum FingerprintKeyStatus {
    Present(FingerprintKey),
    Missing,
}

/// Process-wide secret used to derive deterministic identifier fingerprints.
#[derive(Clone)]
pub struct FingerprintKey {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintKey")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FingerprintKey {
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; FINGERPRINT_KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FingerprintKeyLookupError> {
        Self::checked(FINGERPRINT_KEY_ENTRY, bytes)
    }

    fn checked(source: &str, bytes: Vec<u8>) -> Result<Self, FingerprintKeyLookupError> {
        if bytes.len() == FINGERPRINT_KEY_BYTES {
            return Ok(Self { bytes });
        }
        Err(FingerprintKeyLookupError::InvalidFormat {
            entry: source.to_string(),
            reason: format!(
                "expected {FINGERPRINT_KEY_BYTES} bytes but found {}",
                bytes.len()
            ),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

#[derive(Debug, Error, Clone)]
pub enum FingerprintKeyLookupError {
    #[error(transparent)]
    SecretService(#[from] SecretServiceError),
    #[error("fingerprint key from '{entry}' is invalid: {reason}")]
    InvalidFormat { entry: String, reason: String },
}

/// Reads the key entry without decoding it; a missing entry still counts as reachable.
#[derive(Debug, Clone, Copy)]
pub struct KeyringSecretServiceProbe;

impl SecretServiceProbe for KeyringSecretServiceProbe {
    fn check(&self) -> Result<(), SecretServiceError> {
        match key_entry()?.get_password() {
            Ok(_) | Err(KeyringError::NoEntry) => Ok(()),
            Err(err) => Err(SecretServiceError::for_key_entry(describe_keyring_error(
                &err,
            ))),
        }
    }
}

/// Where the fingerprint key lives; swapped for an in-memory double in tests.
pub trait KeyProvider {
    fn fetch(&self) -> Result<FingerprintKeyStatus, FingerprintKeyLookupError>;
    fn store(&self, key: &FingerprintKey) -> Result<(), SecretServiceError>;
    fn generate(&self) -> FingerprintKey;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecretServiceKeyProvider;

impl KeyProvider for SecretServiceKeyProvider {
    fn fetch(&self) -> Result<FingerprintKeyStatus, FingerprintKeyLookupError> {
        fetch_fingerprint_key()
    }

    fn store(&self, key: &FingerprintKey) -> Result<(), SecretServiceError> {
        store_fingerprint_key(key)
    }

    fn generate(&self) -> FingerprintKey {
        FingerprintKey::generate()
    }
}

pub fn ensure_secret_service_available<P: SecretServiceProbe>(
    probe: &P,
) -> Result<(), SecretServiceError> {
    probe.check()
}

pub fn fetch_fingerprint_key() -> Result<FingerprintKeyStatus, FingerprintKeyLookupError> {
    match key_entry()?.get_password() {
        Ok(secret) => {
            decode_fingerprint_key(FINGERPRINT_KEY_ENTRY, &secret).map(FingerprintKeyStatus::Present)
        }
        Err(KeyringError::NoEntry) => Ok(FingerprintKeyStatus::Missing),
        Err(err) => Err(SecretServiceError::for_key_entry(describe_keyring_error(&err)).into()),
    }
}

pub fn store_fingerprint_key(key: &FingerprintKey) -> Result<(), SecretServiceError> {
    key_entry()?
        .set_password(&key.to_base64())
        .map_err(|err| SecretServiceError::for_key_entry(describe_keyring_error(&err)))
}

pub fn default_service_name() -> &'static str {
    DEFAULT_SERVICE_NAME
}

pub fn fingerprint_key_entry() -> &'static str {
    FINGERPRINT_KEY_ENTRY
}

/// Decodes a base64 key. `source` names where it came from (keyring entry or
/// environment variable) for error reporting.
pub fn decode_fingerprint_key(
    source: &str,
    secret: &str,
) -> Result<FingerprintKey, FingerprintKeyLookupError> {
    let invalid = |reason: String| FingerprintKeyLookupError::InvalidFormat {
        entry: source.to_string(),
        reason,
    };

    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Err(invalid("value is empty".into()));
    }
    let decoded = general_purpose::STANDARD
        .decode(trimmed)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .map_err(|err| invalid(format!("not valid base64: {err}")))?;

    FingerprintKey::checked(source, decoded)
}

fn key_entry() -> Result<Entry, SecretServiceError> {
    Entry::new(DEFAULT_SERVICE_NAME, FINGERPRINT_KEY_ENTRY).map_err(|err| {
        SecretServiceError::for_key_entry(format!("cannot address keyring entry: {err}"))
    })
}

fn describe_keyring_error(err: &KeyringError) -> String {
    match err {
        KeyringError::NoStorageAccess(inner) => format!("keyring locked or unreachable: {inner}"),
        KeyringError::PlatformFailure(inner) => format!("keyring backend failed: {inner}"),
        KeyringError::Ambiguous(items) => {
            format!("{} credentials match the fingerprint key entry", items.len())
        }
        KeyringError::BadEncoding(_) => "stored fingerprint key is not UTF-8".into(),
        other => other.to_string(),
    }
}
