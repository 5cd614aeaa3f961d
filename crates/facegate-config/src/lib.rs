use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";
pub const DATABASE_URL_ENV: &str = "FACEGATE_DATABASE_URL";
pub const FINGERPRINT_KEY_ENV: &str = "FACEGATE_FINGERPRINT_KEY";
pub const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HASH_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_HASH_ITERATIONS: u32 = 2;
pub const DEFAULT_HASH_PARALLELISM: u32 = 1;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 0;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_PIXEL_FORMAT: &str = "Y16";
pub const DEFAULT_WARMUP_FRAMES: u32 = 0;

/// How duplicate enrollments of one plaintext identifier are detected.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStrategy {
    /// Keyed HMAC fingerprint column with a UNIQUE constraint.
    #[default]
    Fingerprint,
    /// UNIQUE on the per-record salted digest only.
    SaltedDigest,
}

impl DedupStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupStrategy::Fingerprint => "fingerprint",
            DedupStrategy::SaltedDigest => "salted-digest",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub database_url: Option<String>,
    pub storage_timeout_secs: Option<u64>,
    pub hash_memory_kib: Option<u32>,
    pub hash_iterations: Option<u32>,
    pub hash_parallelism: Option<u32>,
    pub min_face_size: Option<u32>,
    pub store_images: Option<bool>,
    pub dedup_strategy: Option<DedupStrategy>,
    pub video_device: Option<String>,
    pub pixel_format: Option<String>,
    pub warmup_frames: Option<u32>,
    pub detector_model: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database_url: Option<String>,
    pub storage_timeout: Duration,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
    pub min_face_size: u32,
    pub store_images: bool,
    pub dedup_strategy: DedupStrategy,
    pub video_device: String,
    pub pixel_format: String,
    pub warmup_frames: u32,
    pub detector_model: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            database_url: raw
                .database_url
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            storage_timeout: Duration::from_secs(
                raw.storage_timeout_secs
                    .unwrap_or(DEFAULT_STORAGE_TIMEOUT_SECS)
                    .max(1),
            ),
            hash_memory_kib: raw.hash_memory_kib.unwrap_or(DEFAULT_HASH_MEMORY_KIB),
            hash_iterations: raw.hash_iterations.unwrap_or(DEFAULT_HASH_ITERATIONS),
            hash_parallelism: raw.hash_parallelism.unwrap_or(DEFAULT_HASH_PARALLELISM),
            min_face_size: raw.min_face_size.unwrap_or(DEFAULT_MIN_FACE_SIZE),
            store_images: raw.store_images.unwrap_or(true),
            dedup_strategy: raw.dedup_strategy.unwrap_or_default(),
            video_device: raw
                .video_device
                .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
            pixel_format: raw
                .pixel_format
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            warmup_frames: raw.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
            detector_model: raw.detector_model,
        }
    }

    /// Lets the environment override the connection string.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_ENV)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
        {
            self.database_url = Some(url);
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub fn default_config_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

/// File values from the default locations with the process environment applied.
pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    let mut loaded = load_resolved_from_paths(&default_config_paths())?;
    loaded.resolved.apply_env(|key| std::env::var(key).ok());
    Ok(loaded)
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => {
            let path = entry.source.clone();
            Ok(ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.contents),
                source: Some(path),
            })
        }
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}
