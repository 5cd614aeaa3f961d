pub mod sqlite;

use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

pub use sqlite::SqliteEnrollmentStore;

pub type RecordId = i64;

/// A persisted enrollment. Immutable once inserted.
#[derive(Clone, PartialEq, Eq)]
pub struct EnrollmentRecord {
    pub id: RecordId,
    pub name: String,
    pub identifier_hash: String,
    pub identifier_fingerprint: Option<String>,
    pub phone: Option<String>,
    pub image: Option<Vec<u8>>,
    pub enrolled_at: String,
}

impl std::fmt::Debug for EnrollmentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phone", &self.phone)
            .field("image_len", &self.image.as_ref().map(Vec::len))
            .field("enrolled_at", &self.enrolled_at)
            .finish_non_exhaustive()
    }
}

/// Row contents supplied by the workflow; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    pub name: String,
    pub identifier_hash: String,
    pub identifier_fingerprint: Option<String>,
    pub phone: Option<String>,
    pub image: Option<Vec<u8>>,
    pub enrolled_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(RecordId),
    /// The storage layer's uniqueness constraint rejected the row.
    DuplicateIdentifier,
}

pub trait EnrollmentStore {
    /// Creates the record table if absent. Idempotent.
    fn ensure_schema(&self) -> AppResult<()>;
    /// Inserts atomically; uniqueness is enforced by the storage layer itself.
    fn insert(&self, record: &NewEnrollment) -> AppResult<InsertOutcome>;
    fn find_by_hash(&self, digest: &str) -> AppResult<Option<EnrollmentRecord>>;
    fn find_by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<EnrollmentRecord>>;
    /// Every stored `(id, identifier_hash)` pair, oldest first.
    fn digests(&self) -> AppResult<Vec<(RecordId, String)>>;
    /// Pairs for rows stored without a fingerprint (enrolled under salted-digest dedup).
    fn unfingerprinted_digests(&self) -> AppResult<Vec<(RecordId, String)>>;
    fn count(&self) -> AppResult<u64>;
    /// Releases the underlying connection.
    fn close(self) -> AppResult<()>
    where
        Self: Sized;
}

/// Where the relational store lives, parsed from the configured connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Memory,
    File(PathBuf),
}

impl StorageLocation {
    /// Accepts `sqlite://<path>`, `sqlite::memory:` or a bare path.
    pub fn parse(connection: &str) -> AppResult<Self> {
        let trimmed = connection.trim();
        if trimmed.is_empty() {
            return Err(AppError::ConfigurationMissing {
                what: "database connection string",
                hint: "set database_url in config.toml or FACEGATE_DATABASE_URL",
            });
        }
        if trimmed == "sqlite::memory:" || trimmed == ":memory:" {
            return Ok(StorageLocation::Memory);
        }
        if let Some(path) = trimmed.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(AppError::InvalidInput {
                    field: "database_url",
                    message: "sqlite:// connection string has no path".into(),
                });
            }
            return Ok(StorageLocation::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(AppError::InvalidInput {
                field: "database_url",
                message: format!("unsupported storage scheme '{scheme}'"),
            });
        }
        Ok(StorageLocation::File(PathBuf::from(trimmed)))
    }

    pub fn display(&self) -> String {
        match self {
            StorageLocation::Memory => "sqlite::memory:".into(),
            StorageLocation::File(path) => path.display().to_string(),
        }
    }
}
