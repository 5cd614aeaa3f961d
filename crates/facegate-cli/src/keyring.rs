use facegate_core::secret_service::{
    default_service_name, ensure_secret_service_available, fingerprint_key_entry,
    FingerprintKeyStatus, KeyProvider, KeyringSecretServiceProbe, SecretServiceKeyProvider,
    SecretServiceProbe,
};
use serde::Serialize;
use tracing::info;

use crate::errors::AppResult;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyringCheckSummary {
    pub service: String,
    pub entry: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyringInitSummary {
    pub service: String,
    pub entry: String,
    /// False when a key was already present and left untouched.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum KeyringSummary {
    Check(KeyringCheckSummary),
    Init(KeyringInitSummary),
}

pub fn run_keyring_check() -> AppResult<KeyringSummary> {
    check_with_probe(&KeyringSecretServiceProbe).map(KeyringSummary::Check)
}

pub fn check_with_probe<P: SecretServiceProbe>(probe: &P) -> AppResult<KeyringCheckSummary> {
    ensure_secret_service_available(probe)?;
    Ok(KeyringCheckSummary {
        service: default_service_name().to_string(),
        entry: fingerprint_key_entry().to_string(),
    })
}

pub fn run_keyring_init() -> AppResult<KeyringSummary> {
    init_with_provider(&SecretServiceKeyProvider).map(KeyringSummary::Init)
}

/// Stores a fresh key only when none exists. An existing key is never replaced.
pub fn init_with_provider<K: KeyProvider>(keys: &K) -> AppResult<KeyringInitSummary> {
    let created = match keys.fetch()? {
        FingerprintKeyStatus::Present(_) => false,
        FingerprintKeyStatus::Missing => {
            let key = keys.generate();
            keys.store(&key)?;
            info!(entry = fingerprint_key_entry(), "stored new fingerprint key");
            true
        }
    };
    Ok(KeyringInitSummary {
        service: default_service_name().to_string(),
        entry: fingerprint_key_entry().to_string(),
        created,
    })
}
