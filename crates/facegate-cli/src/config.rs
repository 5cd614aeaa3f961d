use std::path::Path;

use facegate_config::{
    ConfigError, DedupStrategy, ResolvedConfig, ResolvedConfigWithSource, FINGERPRINT_KEY_ENV,
};
use facegate_core::capture::{DeviceLocator, FileFrameSource, FrameSource};
use facegate_core::hasher::{HashCost, IdentifierFingerprinter, IdentifierHasher};
use facegate_core::presence::{FaceDetector, PresenceGate};
use facegate_core::secret_service::{
    decode_fingerprint_key, FingerprintKey, FingerprintKeyStatus, KeyProvider,
    SecretServiceKeyProvider,
};
use facegate_core::store::{SqliteEnrollmentStore, StorageLocation};
use facegate_core::Workflow;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

pub type BoxedDetector = Box<dyn FaceDetector>;
pub type CliWorkflow = Workflow<BoxedDetector, SqliteEnrollmentStore>;

/// Loads the config files and applies the process environment.
pub fn load_config() -> AppResult<ResolvedConfigWithSource> {
    let loaded = facegate_config::load_resolved_config().map_err(map_config_error)?;
    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => debug!("no configuration file found; using defaults"),
    }
    Ok(loaded)
}

pub fn map_config_error(err: ConfigError) -> AppError {
    match err {
        ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
        ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
    }
}

pub fn store_location(config: &ResolvedConfig) -> AppResult<StorageLocation> {
    let url = config
        .database_url
        .as_deref()
        .ok_or(AppError::ConfigurationMissing {
            what: "database connection string",
            hint: "set database_url in config.toml or FACEGATE_DATABASE_URL",
        })?;
    StorageLocation::parse(url)
}

pub fn open_store(config: &ResolvedConfig) -> AppResult<SqliteEnrollmentStore> {
    SqliteEnrollmentStore::open(store_location(config)?, config.storage_timeout)
}

pub fn build_hasher(config: &ResolvedConfig) -> AppResult<IdentifierHasher> {
    IdentifierHasher::new(HashCost {
        memory_kib: config.hash_memory_kib,
        iterations: config.hash_iterations,
        parallelism: config.hash_parallelism,
    })
}

/// Resolves the fingerprint key for the configured dedup strategy.
///
/// The environment wins over the Secret Service. Under `salted-digest` no key is
/// needed and `None` is returned without touching either source.
pub fn resolve_fingerprint_key<K: KeyProvider>(
    strategy: DedupStrategy,
    env_value: Option<String>,
    keys: &K,
) -> AppResult<Option<FingerprintKey>> {
    if strategy == DedupStrategy::SaltedDigest {
        return Ok(None);
    }
    if let Some(value) = env_value.filter(|value| !value.trim().is_empty()) {
        debug!("fingerprint key taken from environment");
        return Ok(Some(decode_fingerprint_key(FINGERPRINT_KEY_ENV, &value)?));
    }
    match keys.fetch()? {
        FingerprintKeyStatus::Present(key) => Ok(Some(key)),
        FingerprintKeyStatus::Missing => Err(AppError::ConfigurationMissing {
            what: "identifier fingerprint key",
            hint: "run `facegate keyring init` or set FACEGATE_FINGERPRINT_KEY",
        }),
    }
}

#[cfg(feature = "dlib")]
pub fn build_detector(config: &ResolvedConfig) -> AppResult<BoxedDetector> {
    let detector = facegate_core::presence::DlibDetector::new(config.detector_model.as_deref())?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "dlib"))]
pub fn build_detector(_config: &ResolvedConfig) -> AppResult<BoxedDetector> {
    Err(AppError::DetectorUnavailable(
        "facegate was built without the `dlib` feature".into(),
    ))
}

/// Assembles a ready workflow; any missing configuration stops construction.
pub fn build_workflow(config: &ResolvedConfig) -> AppResult<CliWorkflow> {
    let key = resolve_fingerprint_key(
        config.dedup_strategy,
        std::env::var(FINGERPRINT_KEY_ENV).ok(),
        &SecretServiceKeyProvider,
    )?;
    let detector = build_detector(config)?;
    let store = open_store(config)?;
    let workflow = Workflow::builder(
        PresenceGate::new(detector).with_min_face_size(config.min_face_size),
        store,
    )
    .hasher(build_hasher(config)?)
    .fingerprinter(key.map(IdentifierFingerprinter::new))
    .store_images(config.store_images)
    .build()?;
    info!(
        dedup = config.dedup_strategy.as_str(),
        store_images = config.store_images,
        "workflow constructed"
    );
    Ok(workflow)
}

pub fn frame_source(
    image: Option<&Path>,
    device: Option<&str>,
    config: &ResolvedConfig,
) -> AppResult<Box<dyn FrameSource>> {
    match (image, device) {
        (Some(path), _) => Ok(Box::new(FileFrameSource::new(path))),
        (None, device) => device_source(
            DeviceLocator::from_option(Some(
                device.unwrap_or(config.video_device.as_str()).to_string(),
            )),
            config,
        ),
    }
}

#[cfg(feature = "v4l")]
fn device_source(locator: DeviceLocator, config: &ResolvedConfig) -> AppResult<Box<dyn FrameSource>> {
    use facegate_core::capture::{V4lCaptureConfig, V4lFrameSource};

    let source = V4lFrameSource::new(V4lCaptureConfig {
        device: locator,
        pixel_format: config.pixel_format.clone(),
        warmup_frames: config.warmup_frames,
    })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "v4l"))]
fn device_source(
    locator: DeviceLocator,
    _config: &ResolvedConfig,
) -> AppResult<Box<dyn FrameSource>> {
    Err(AppError::Capability(format!(
        "cannot capture from {}: facegate was built without the `v4l` feature",
        locator.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use facegate_config::ConfigFile;
    use facegate_core::secret_service::{FingerprintKeyLookupError, SecretServiceError};

    struct StubKeys {
        status: Option<FingerprintKey>,
        fetches: Cell<usize>,
    }

    impl KeyProvider for StubKeys {
        fn fetch(&self) -> Result<FingerprintKeyStatus, FingerprintKeyLookupError> {
            self.fetches.set(self.fetches.get() + 1);
            Ok(match &self.status {
                Some(key) => FingerprintKeyStatus::Present(key.clone()),
                None => FingerprintKeyStatus::Missing,
            })
        }

        fn store(&self, _key: &FingerprintKey) -> Result<(), SecretServiceError> {
            Ok(())
        }

        fn generate(&self) -> FingerprintKey {
            FingerprintKey::generate()
        }
    }

    fn keys(status: Option<FingerprintKey>) -> StubKeys {
        StubKeys {
            status,
            fetches: Cell::new(0),
        }
    }

    #[test]
    fn default_build_ships_detector_and_camera_support() {
        assert!(cfg!(feature = "dlib"));
        assert!(cfg!(feature = "v4l"));
    }

    #[cfg(feature = "dlib")]
    #[test]
    fn hog_detector_builds_without_a_model() {
        assert!(build_detector(&ResolvedConfig::default()).is_ok());
    }

    #[test]
    fn salted_digest_needs_no_key() {
        let stub = keys(None);
        let key = resolve_fingerprint_key(DedupStrategy::SaltedDigest, None, &stub).unwrap();
        assert!(key.is_none());
        assert_eq!(stub.fetches.get(), 0);
    }

    #[test]
    fn environment_key_wins_over_secret_service() {
        let env_key = FingerprintKey::from_bytes(vec![1u8; 32]).unwrap();
        let stub = keys(Some(FingerprintKey::from_bytes(vec![2u8; 32]).unwrap()));
        let key = resolve_fingerprint_key(
            DedupStrategy::Fingerprint,
            Some(env_key.to_base64()),
            &stub,
        )
        .unwrap()
        .unwrap();
        assert_eq!(key.as_bytes(), env_key.as_bytes());
        assert_eq!(stub.fetches.get(), 0);
    }

    #[test]
    fn missing_key_is_configuration_missing() {
        let err = resolve_fingerprint_key(DedupStrategy::Fingerprint, None, &keys(None))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigurationMissing { .. }));
    }

    #[test]
    fn malformed_env_key_is_reported() {
        let err = resolve_fingerprint_key(
            DedupStrategy::Fingerprint,
            Some("c2hvcnQ=".into()),
            &keys(None),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::SecretServiceKeyInvalid { .. }));
    }

    #[test]
    fn missing_connection_string_prevents_store() {
        let config = ResolvedConfig::default();
        assert!(matches!(
            open_store(&config),
            Err(AppError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn in_memory_store_opens_from_config() {
        let config = ResolvedConfig::from_raw(ConfigFile {
            database_url: Some("sqlite::memory:".into()),
            ..ConfigFile::default()
        });
        assert!(open_store(&config).is_ok());
    }

    #[test]
    fn image_path_selects_file_source() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("still.png");
        std::fs::write(&path, b"bytes").unwrap();

        let mut source = frame_source(Some(&path), None, &ResolvedConfig::default()).unwrap();
        assert_eq!(source.acquire_frame().unwrap().unwrap().bytes, b"bytes");
    }
}
