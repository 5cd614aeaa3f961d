//! One-way handling of personal identifiers.
//!
//! [`IdentifierHasher`] produces self-describing Argon2id digests (PHC string
//! format, salt and cost embedded) used to confirm an identifier later.
//! [`IdentifierFingerprinter`] produces a deterministic keyed HMAC-SHA256 value
//! so the store can enforce one record per plaintext identifier even though
//! every digest carries its own random salt.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{AppError, AppResult};
use crate::secret_service::FingerprintKey;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_ITERATIONS: u32 = 2;
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Argon2id cost parameters applied to newly created digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentifierHasher {
    cost: HashCost,
    params: Params,
}

impl IdentifierHasher {
    pub fn new(cost: HashCost) -> AppResult<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|err| AppError::Hashing(format!("invalid Argon2 cost parameters: {err}")))?;
        Ok(Self { cost, params })
    }

    pub fn cost(&self) -> HashCost {
        self.cost
    }

    /// Hashes `plaintext` under a fresh random salt.
    pub fn hash(&self, plaintext: &str) -> AppResult<String> {
        let normalized = normalize_identifier(plaintext)?;
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2()
            .hash_password(normalized.as_bytes(), &salt)
            .map_err(|err| AppError::Hashing(err.to_string()))?;
        Ok(digest.to_string())
    }

    /// Recomputes the digest with the salt and cost stored in `digest`.
    ///
    /// A mismatch is `Ok(false)`; only an unparseable digest is an error.
    pub fn matches(&self, plaintext: &str, digest: &str) -> AppResult<bool> {
        let parsed = PasswordHash::new(digest).map_err(|err| AppError::MalformedDigest {
            message: err.to_string(),
        })?;
        let normalized = plaintext.trim();
        if normalized.is_empty() {
            return Ok(false);
        }

        // Output comparison inside verify_password is constant-time.
        match self.argon2().verify_password(normalized.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AppError::MalformedDigest {
                message: err.to_string(),
            }),
        }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for IdentifierHasher {
    fn default() -> Self {
        Self {
            cost: HashCost::default(),
            params: Params::default(),
        }
    }
}

#[derive(Clone)]
pub struct IdentifierFingerprinter {
    key: FingerprintKey,
}

impl IdentifierFingerprinter {
    pub fn new(key: FingerprintKey) -> Self {
        Self { key }
    }

    pub fn fingerprint(&self, plaintext: &str) -> AppResult<String> {
        let normalized = normalize_identifier(plaintext)?;
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|err| AppError::Fingerprint(format!("invalid HMAC key: {err}")))?;
        mac.update(normalized.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for IdentifierFingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierFingerprinter").finish_non_exhaustive()
    }
}

fn normalize_identifier(plaintext: &str) -> AppResult<&str> {
    let trimmed = plaintext.trim();
    if trimmed.is_empty() {
        return Err(AppError::EmptyIdentifier);
    }
    Ok(trimmed)
}
