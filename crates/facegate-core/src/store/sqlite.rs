use std::path::Path;
use std::time::Duration;

use rusqlite::{ffi, params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::store::{
    EnrollmentRecord, EnrollmentStore, InsertOutcome, NewEnrollment, RecordId, StorageLocation,
};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS enrollments (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  identifier_hash TEXT NOT NULL UNIQUE,
  identifier_fingerprint TEXT UNIQUE,
  phone TEXT,
  image BLOB,
  enrolled_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_enrollments_no_update
BEFORE UPDATE ON enrollments
BEGIN
  SELECT RAISE(ABORT, 'enrollment records are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_enrollments_no_delete
BEFORE DELETE ON enrollments
BEGIN
  SELECT RAISE(ABORT, 'enrollment records are immutable');
END;
";

const RECORD_COLUMNS: &str =
    "id, name, identifier_hash, identifier_fingerprint, phone, image, enrolled_at";

/// Enrollment store backed by a single SQLite connection.
///
/// Writes use `synchronous = FULL`, so an insert is durable when it returns.
/// Lock waits are bounded by the busy timeout and then surface as
/// [`AppError::StorageUnavailable`].
pub struct SqliteEnrollmentStore {
    conn: Connection,
    location: StorageLocation,
}

impl SqliteEnrollmentStore {
    pub fn connect(connection: &str, timeout: Duration) -> AppResult<Self> {
        let location = StorageLocation::parse(connection)?;
        Self::open(location, timeout)
    }

    pub fn open(location: StorageLocation, timeout: Duration) -> AppResult<Self> {
        let conn = match &location {
            StorageLocation::Memory => Connection::open_in_memory().map_err(map_sqlite_error)?,
            StorageLocation::File(path) => open_file(path)?,
        };

        conn.busy_timeout(timeout).map_err(map_sqlite_error)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )
        .map_err(map_sqlite_error)?;

        if let StorageLocation::File(path) = &location {
            restrict_permissions(path)?;
        }

        debug!(location = %location.display(), timeout_ms = timeout.as_millis() as u64, "opened enrollment store");
        Ok(Self { conn, location })
    }

    /// Opens an existing store without creating files, changing pragmas or
    /// touching permissions. Writes through this handle fail.
    pub fn open_read_only(location: StorageLocation, timeout: Duration) -> AppResult<Self> {
        let conn = match &location {
            StorageLocation::Memory => Connection::open_in_memory().map_err(map_sqlite_error)?,
            StorageLocation::File(path) => {
                if !path.exists() {
                    return Err(AppError::StorageUnavailable {
                        message: format!("database file {} does not exist", path.display()),
                    });
                }
                Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(map_sqlite_error)?
            }
        };
        conn.busy_timeout(timeout).map_err(map_sqlite_error)?;

        debug!(location = %location.display(), "opened enrollment store read-only");
        Ok(Self { conn, location })
    }

    pub fn in_memory() -> AppResult<Self> {
        Self::open(StorageLocation::Memory, DEFAULT_STORAGE_TIMEOUT)
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Whether the `enrollments` table exists.
    pub fn schema_present(&self) -> AppResult<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'enrollments'",
                [],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(map_sqlite_error)
    }

    fn select_digests(&self, sql: &str) -> AppResult<Vec<(RecordId, String)>> {
        let mut stmt = self.conn.prepare(sql).map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(map_sqlite_error)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_error)
    }

    fn find_one(&self, column: &str, value: &str) -> AppResult<Option<EnrollmentRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM enrollments WHERE {column} = ?1");
        self.conn
            .query_row(&sql, params![value], record_from_row)
            .optional()
            .map_err(map_sqlite_error)
    }
}

impl EnrollmentStore for SqliteEnrollmentStore {
    fn ensure_schema(&self) -> AppResult<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .map_err(map_sqlite_error)
    }

    fn insert(&self, record: &NewEnrollment) -> AppResult<InsertOutcome> {
        let result = self.conn.execute(
            "INSERT INTO enrollments(
                name, identifier_hash, identifier_fingerprint, phone, image, enrolled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.identifier_hash,
                record.identifier_fingerprint,
                record.phone,
                record.image,
                record.enrolled_at,
            ],
        );

        match result {
            Ok(_) => {
                let id: RecordId = self.conn.last_insert_rowid();
                debug!(record_id = id, "enrollment row inserted");
                Ok(InsertOutcome::Inserted(id))
            }
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::DuplicateIdentifier),
            Err(err) => Err(map_sqlite_error(err)),
        }
    }

    fn find_by_hash(&self, digest: &str) -> AppResult<Option<EnrollmentRecord>> {
        self.find_one("identifier_hash", digest)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<EnrollmentRecord>> {
        self.find_one("identifier_fingerprint", fingerprint)
    }

    fn digests(&self) -> AppResult<Vec<(RecordId, String)>> {
        self.select_digests("SELECT id, identifier_hash FROM enrollments ORDER BY id")
    }

    fn unfingerprinted_digests(&self) -> AppResult<Vec<(RecordId, String)>> {
        self.select_digests(
            "SELECT id, identifier_hash FROM enrollments \
             WHERE identifier_fingerprint IS NULL ORDER BY id",
        )
    }

    fn count(&self) -> AppResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM enrollments", [], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(count.max(0) as u64)
    }

    fn close(self) -> AppResult<()> {
        let location = self.location.display();
        self.conn
            .close()
            .map_err(|(_, err)| map_sqlite_error(err))?;
        debug!(location = %location, "closed enrollment store");
        Ok(())
    }
}

fn open_file(path: &Path) -> AppResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|err| AppError::StorageUnavailable {
                message: format!("cannot create {}: {err}", parent.display()),
            })?;
        }
    }
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(map_sqlite_error)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|err| AppError::StorageUnavailable {
        message: format!("cannot stat {}: {err}", path.display()),
    })?;
    let mut perms = metadata.permissions();
    if perms.mode() & 0o777 != 0o600 {
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> AppResult<()> {
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<EnrollmentRecord> {
    Ok(EnrollmentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        identifier_hash: row.get(2)?,
        identifier_fingerprint: row.get(3)?,
        phone: row.get(4)?,
        image: row.get(5)?,
        enrolled_at: row.get(6)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == ErrorCode::ConstraintViolation
                && (code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn map_sqlite_error(err: rusqlite::Error) -> AppError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::FileLockingProtocolFailed
            | ErrorCode::NotADatabase => AppError::StorageUnavailable {
                message: err.to_string(),
            },
            _ => AppError::Storage(err.to_string()),
        },
        _ => AppError::Storage(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_row(hash: &str, fingerprint: Option<&str>) -> NewEnrollment {
        NewEnrollment {
            name: "Ana".into(),
            identifier_hash: hash.into(),
            identifier_fingerprint: fingerprint.map(str::to_string),
            phone: Some("555".into()),
            image: Some(vec![0x89, 0x50, 0x4E, 0x47]),
            enrolled_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn insert_assigns_ids_and_round_trips_blob() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();

        let first = store.insert(&new_row("h1", Some("f1"))).unwrap();
        let second = store.insert(&new_row("h2", Some("f2"))).unwrap();
        assert_eq!(first, InsertOutcome::Inserted(1));
        assert_eq!(second, InsertOutcome::Inserted(2));

        let record = store.find_by_hash("h2").unwrap().unwrap();
        assert_eq!(record.id, 2);
        assert_eq!(record.image.as_deref(), Some(&[0x89, 0x50, 0x4E, 0x47][..]));
        assert_eq!(record.phone.as_deref(), Some("555"));
        assert!(store.find_by_hash("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_fingerprint_is_rejected_by_constraint() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();

        store.insert(&new_row("h1", Some("same"))).unwrap();
        let outcome = store.insert(&new_row("h2", Some("same"))).unwrap();
        assert_eq!(outcome, InsertOutcome::DuplicateIdentifier);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn null_fingerprints_do_not_collide() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();

        store.insert(&new_row("h1", None)).unwrap();
        store.insert(&new_row("h2", None)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(
            store.insert(&new_row("h1", None)).unwrap(),
            InsertOutcome::DuplicateIdentifier
        );
    }

    #[test]
    fn records_cannot_be_updated_or_deleted() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.insert(&new_row("h1", Some("f1"))).unwrap();

        let update = store
            .conn
            .execute("UPDATE enrollments SET name = 'Eve' WHERE id = 1", []);
        assert!(update.is_err());
        let delete = store.conn.execute("DELETE FROM enrollments", []);
        assert!(delete.is_err());
        assert_eq!(store.find_by_fingerprint("f1").unwrap().unwrap().name, "Ana");
    }

    #[test]
    fn insert_without_schema_is_a_storage_error() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        let err = store.insert(&new_row("h1", None)).unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[test]
    fn file_store_persists_across_connections() {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite://{}", tmp.path().join("nested/enroll.db").display());

        let store = SqliteEnrollmentStore::connect(&url, DEFAULT_STORAGE_TIMEOUT).unwrap();
        store.ensure_schema().unwrap();
        store.insert(&new_row("h1", Some("f1"))).unwrap();
        store.close().unwrap();

        let reopened = SqliteEnrollmentStore::connect(&url, DEFAULT_STORAGE_TIMEOUT).unwrap();
        reopened.ensure_schema().unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.digests().unwrap(), vec![(1, "h1".to_string())]);
    }

    #[test]
    fn unfingerprinted_digests_lists_only_rows_without_fingerprint() {
        let store = SqliteEnrollmentStore::in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.insert(&new_row("h1", Some("f1"))).unwrap();
        store.insert(&new_row("h2", None)).unwrap();

        assert_eq!(store.digests().unwrap().len(), 2);
        assert_eq!(
            store.unfingerprinted_digests().unwrap(),
            vec![(2, "h2".to_string())]
        );
    }

    #[test]
    fn read_only_open_never_creates_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing/enroll.db");

        let err = SqliteEnrollmentStore::open_read_only(
            StorageLocation::File(path.clone()),
            DEFAULT_STORAGE_TIMEOUT,
        )
        .err()
        .unwrap();
        assert!(err.is_retryable());
        assert!(!path.exists());
        assert!(!tmp.path().join("missing").exists());
    }

    #[test]
    fn read_only_open_reports_schema_and_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("enroll.db");
        let location = StorageLocation::File(path.clone());

        let bare = SqliteEnrollmentStore::open(location.clone(), DEFAULT_STORAGE_TIMEOUT).unwrap();
        bare.close().unwrap();
        let reader =
            SqliteEnrollmentStore::open_read_only(location.clone(), DEFAULT_STORAGE_TIMEOUT).unwrap();
        assert!(!reader.schema_present().unwrap());
        reader.close().unwrap();

        let writer = SqliteEnrollmentStore::open(location.clone(), DEFAULT_STORAGE_TIMEOUT).unwrap();
        writer.ensure_schema().unwrap();
        writer.insert(&new_row("h1", None)).unwrap();
        writer.close().unwrap();

        let reader = SqliteEnrollmentStore::open_read_only(location, DEFAULT_STORAGE_TIMEOUT).unwrap();
        assert!(reader.schema_present().unwrap());
        assert_eq!(reader.count().unwrap(), 1);
        assert!(reader.insert(&new_row("h2", None)).is_err());
    }

    #[test]
    fn lock_held_past_busy_timeout_is_retryable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("enroll.db");
        let store =
            SqliteEnrollmentStore::open(StorageLocation::File(path.clone()), Duration::from_secs(1))
                .unwrap();
        store.ensure_schema().unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let started = std::time::Instant::now();
        let err = store.insert(&new_row("h1", Some("f1"))).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert!(matches!(err, AppError::StorageUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), std::process::ExitCode::from(3));

        holder.execute_batch("ROLLBACK;").unwrap();
        assert_eq!(store.insert(&new_row("h1", Some("f1"))).unwrap(), InsertOutcome::Inserted(1));
    }

    #[cfg(unix)]
    #[test]
    fn database_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("enroll.db");
        let _store =
            SqliteEnrollmentStore::open(StorageLocation::File(path.clone()), DEFAULT_STORAGE_TIMEOUT)
                .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
