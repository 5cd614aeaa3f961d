use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use facegate_config::{
    self, ConfigError, DedupStrategy, ResolvedConfig, ResolvedConfigWithSource,
    FINGERPRINT_KEY_ENV,
};
use facegate_core::capture::DeviceLocator;
use facegate_core::secret_service::{
    default_service_name, ensure_secret_service_available, KeyProvider,
    KeyringSecretServiceProbe, SecretServiceKeyProvider, SecretServiceProbe,
};
use facegate_core::store::{EnrollmentStore, SqliteEnrollmentStore, StorageLocation};
use serde::Serialize;

use crate::config::{build_detector, resolve_fingerprint_key, store_location};
use crate::errors::AppResult;

const CHECK_CONFIG: &str = "config";
const CHECK_DATABASE: &str = "database";
const CHECK_FINGERPRINT_KEY: &str = "fingerprint_key";
const CHECK_SECRET_SERVICE: &str = "secret_service";
const CHECK_DETECTOR: &str = "detector";
const CHECK_VIDEO_DEVICE: &str = "video_device";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            path: None,
            device: None,
        }
    }

    fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorOutcome {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorOutcome {
    /// Warnings alone still exit 0.
    pub fn exit_code(&self) -> ExitCode {
        if self.ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        }
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|check| check.status == status).count()
    }
}

pub trait DeviceOpener {
    fn open(&self, locator: &DeviceLocator) -> AppResult<()>;
}

#[derive(Clone, Copy)]
pub struct RealDeviceOpener;

impl DeviceOpener for RealDeviceOpener {
    #[cfg(feature = "v4l")]
    fn open(&self, locator: &DeviceLocator) -> AppResult<()> {
        facegate_core::capture::probe_device(locator)
    }

    #[cfg(not(feature = "v4l"))]
    fn open(&self, locator: &DeviceLocator) -> AppResult<()> {
        Err(facegate_core::errors::AppError::Capability(format!(
            "cannot open {}: facegate was built without the `v4l` feature",
            locator.display()
        )))
    }
}

pub struct DoctorContext<P, K, D> {
    pub config_paths: Vec<PathBuf>,
    pub secret_service_probe: P,
    pub keys: K,
    pub device_opener: D,
    pub env: Box<dyn Fn(&str) -> Option<String>>,
}

impl Default for DoctorContext<KeyringSecretServiceProbe, SecretServiceKeyProvider, RealDeviceOpener> {
    fn default() -> Self {
        Self {
            config_paths: facegate_config::default_config_paths().to_vec(),
            secret_service_probe: KeyringSecretServiceProbe,
            keys: SecretServiceKeyProvider,
            device_opener: RealDeviceOpener,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }
}

pub fn run_doctor() -> AppResult<DoctorOutcome> {
    run_doctor_with(&DoctorContext::default())
}

pub fn run_doctor_with<P, K, D>(ctx: &DoctorContext<P, K, D>) -> AppResult<DoctorOutcome>
where
    P: SecretServiceProbe,
    K: KeyProvider,
    D: DeviceOpener,
{
    let (config_check, mut loaded) = check_config(&ctx.config_paths);
    loaded.resolved.apply_env(|key| (ctx.env)(key));
    let config = &loaded.resolved;

    let checks = vec![
        config_check,
        check_database(config),
        check_fingerprint_key(config, (ctx.env)(FINGERPRINT_KEY_ENV), &ctx.keys),
        check_secret_service(&ctx.secret_service_probe),
        check_detector(config),
        check_video_device(config, &ctx.device_opener),
    ];
    let ok = checks.iter().all(|c| c.status != CheckStatus::Fail);

    Ok(DoctorOutcome { ok, checks })
}

fn check_config(paths: &[PathBuf]) -> (DoctorCheck, ResolvedConfigWithSource) {
    let fallback = || ResolvedConfigWithSource {
        resolved: ResolvedConfig::default(),
        source: None,
    };
    match facegate_config::load_from_paths(paths) {
        Ok(Some(entry)) => {
            let check = DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Pass,
                format!("Loaded config from {}", entry.source.display()),
            )
            .with_path(entry.source.display().to_string());
            (
                check,
                ResolvedConfigWithSource {
                    resolved: ResolvedConfig::from_raw(entry.contents),
                    source: Some(entry.source),
                },
            )
        }
        Ok(None) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Warn,
                format!("No config file found; tried {}", display_paths(paths)),
            ),
            fallback(),
        ),
        Err(ConfigError::Parse { path, message }) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Fail,
                format!("Failed to parse {}: {}", path.display(), message),
            )
            .with_path(path.display().to_string()),
            fallback(),
        ),
        Err(ConfigError::Read { path, source }) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Fail,
                format!("Failed to read {}: {}", path.display(), source),
            )
            .with_path(path.display().to_string()),
            fallback(),
        ),
    }
}

/// Inspects the store without creating it, migrating it or changing its mode.
fn check_database(config: &ResolvedConfig) -> DoctorCheck {
    let location = match store_location(config) {
        Ok(location) => location,
        Err(err) => {
            return DoctorCheck::new(CHECK_DATABASE, CheckStatus::Fail, err.human_message())
        }
    };
    let display = location.display();
    match &location {
        StorageLocation::Memory => {
            return DoctorCheck::new(
                CHECK_DATABASE,
                CheckStatus::Pass,
                "In-memory store; records last for a single run",
            )
            .with_path(display)
        }
        StorageLocation::File(path) if !path.exists() => {
            return DoctorCheck::new(
                CHECK_DATABASE,
                CheckStatus::Warn,
                "Database file does not exist yet; run `facegate schema` to create it",
            )
            .with_path(display)
        }
        StorageLocation::File(_) => {}
    }

    let inspected = SqliteEnrollmentStore::open_read_only(location, config.storage_timeout)
        .and_then(|store| {
            let report = if store.schema_present()? {
                Some((store.count()?, store.unfingerprinted_digests()?.len()))
            } else {
                None
            };
            store.close()?;
            Ok(report)
        });

    let check = match inspected {
        Ok(None) => DoctorCheck::new(
            CHECK_DATABASE,
            CheckStatus::Warn,
            "Enrollment table missing; run `facegate schema` to create it",
        ),
        Ok(Some((records, unfingerprinted)))
            if unfingerprinted > 0 && config.dedup_strategy == DedupStrategy::Fingerprint =>
        {
            DoctorCheck::new(
                CHECK_DATABASE,
                CheckStatus::Warn,
                format!(
                    "{unfingerprinted} of {records} record(s) have no fingerprint; \
                     duplicate checks against them fall back to digest scans"
                ),
            )
        }
        Ok(Some((records, _))) => DoctorCheck::new(
            CHECK_DATABASE,
            CheckStatus::Pass,
            format!("Enrollment store ready with {records} record(s)"),
        ),
        Err(err) => DoctorCheck::new(CHECK_DATABASE, CheckStatus::Fail, err.human_message()),
    };
    check.with_path(display)
}

fn check_fingerprint_key<K: KeyProvider>(
    config: &ResolvedConfig,
    env_value: Option<String>,
    keys: &K,
) -> DoctorCheck {
    if config.dedup_strategy == DedupStrategy::SaltedDigest {
        return DoctorCheck::new(
            CHECK_FINGERPRINT_KEY,
            CheckStatus::Warn,
            "dedup_strategy is salted-digest; repeat enrollments of one identifier are not detected",
        );
    }
    let from_env = env_value.is_some();
    match resolve_fingerprint_key(config.dedup_strategy, env_value, keys) {
        Ok(_) if from_env => DoctorCheck::new(
            CHECK_FINGERPRINT_KEY,
            CheckStatus::Pass,
            format!("Fingerprint key supplied by {FINGERPRINT_KEY_ENV}"),
        ),
        Ok(_) => DoctorCheck::new(
            CHECK_FINGERPRINT_KEY,
            CheckStatus::Pass,
            "Fingerprint key present in Secret Service",
        ),
        Err(err) => DoctorCheck::new(CHECK_FINGERPRINT_KEY, CheckStatus::Fail, err.human_message()),
    }
}

fn check_secret_service<P: SecretServiceProbe>(probe: &P) -> DoctorCheck {
    match ensure_secret_service_available(probe) {
        Ok(()) => DoctorCheck::new(
            CHECK_SECRET_SERVICE,
            CheckStatus::Pass,
            format!("Secret Service reachable (service '{}')", default_service_name()),
        ),
        Err(err) => DoctorCheck::new(CHECK_SECRET_SERVICE, CheckStatus::Warn, err.to_string()),
    }
}

fn check_detector(config: &ResolvedConfig) -> DoctorCheck {
    if let Some(path) = &config.detector_model {
        if let Err(err) = fs::File::open(path) {
            return DoctorCheck::new(
                CHECK_DETECTOR,
                CheckStatus::Fail,
                format!("Cannot read model {}: {}", path.display(), err),
            )
            .with_path(path.display().to_string());
        }
    }
    match build_detector(config) {
        Ok(_) => DoctorCheck::new(CHECK_DETECTOR, CheckStatus::Pass, "Face detector loaded"),
        Err(err) => DoctorCheck::new(CHECK_DETECTOR, CheckStatus::Fail, err.human_message()),
    }
}

fn check_video_device<D: DeviceOpener>(config: &ResolvedConfig, opener: &D) -> DoctorCheck {
    let locator = DeviceLocator::from_option(Some(config.video_device.clone()));
    let display = locator.display();
    match opener.open(&locator) {
        Ok(()) => DoctorCheck::new(
            CHECK_VIDEO_DEVICE,
            CheckStatus::Pass,
            format!("Opened video device {display}"),
        )
        .with_device(display),
        // Kiosks fed from image files can run without a camera.
        Err(err) => DoctorCheck::new(CHECK_VIDEO_DEVICE, CheckStatus::Warn, err.human_message())
            .with_device(display),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
