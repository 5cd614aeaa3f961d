use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use facegate_core::errors::AppResult;
use facegate_core::hasher::{HashCost, IdentifierFingerprinter, IdentifierHasher};
use facegate_core::presence::{BoundingBox, FaceDetector, PresenceGate};
use facegate_core::secret_service::FingerprintKey;
use facegate_core::store::{EnrollmentStore, SqliteEnrollmentStore, StorageLocation};
use facegate_core::{EnrollmentRequest, RejectionReason, Workflow, WorkflowOutcome};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use tempfile::TempDir;

/// Reports a face whenever the still is mostly bright.
struct BrightnessDetector;

impl FaceDetector for BrightnessDetector {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
        let total: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
        let mean = total / u64::from(image.width() * image.height());
        if mean > 128 {
            Ok(vec![BoundingBox {
                left: 0,
                top: 0,
                right: i64::from(image.width()),
                bottom: i64::from(image.height()),
            }])
        } else {
            Ok(Vec::new())
        }
    }
}

fn still(value: u8) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([value, value, value])))
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn face_a() -> Vec<u8> {
    still(230)
}

fn empty_room() -> Vec<u8> {
    still(10)
}

fn hasher() -> IdentifierHasher {
    IdentifierHasher::new(HashCost {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}

fn fingerprinter() -> IdentifierFingerprinter {
    IdentifierFingerprinter::new(FingerprintKey::from_bytes(vec![42u8; 32]).unwrap())
}

fn open_store(path: &Path) -> SqliteEnrollmentStore {
    SqliteEnrollmentStore::open(StorageLocation::File(path.to_path_buf()), Duration::from_secs(5))
        .unwrap()
}

fn workflow(
    path: &Path,
    fingerprint: bool,
) -> Workflow<BrightnessDetector, SqliteEnrollmentStore> {
    Workflow::builder(PresenceGate::new(BrightnessDetector), open_store(path))
        .hasher(hasher())
        .fingerprinter(fingerprint.then(fingerprinter))
        .build()
        .unwrap()
}

#[test]
fn ana_enrolls_once_and_digest_confirms_only_her_identifier() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("enrollments.db");
    let mut wf = workflow(&db, true);

    let image = face_a();
    let outcome = wf
        .enroll(EnrollmentRequest::new("Ana", "111", Some("555".into()), image.clone()))
        .unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Enrolled { .. }));
    assert_eq!(wf.store().count().unwrap(), 1);

    let (_, digest) = wf.store().digests().unwrap().remove(0);
    assert!(hasher().matches("111", &digest).unwrap());
    assert!(!hasher().matches("222", &digest).unwrap());

    let record = wf.store().find_by_hash(&digest).unwrap().unwrap();
    assert_eq!(record.name, "Ana");
    assert_eq!(record.phone.as_deref(), Some("555"));
    assert_eq!(record.image.as_deref(), Some(image.as_slice()));

    let again = wf
        .enroll(EnrollmentRequest::new("Ana", "111", Some("555".into()), face_a()))
        .unwrap();
    assert_eq!(
        again,
        WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier)
    );
    assert_eq!(wf.store().count().unwrap(), 1);
    wf.shutdown().unwrap();
}

#[test]
fn enrollment_without_a_face_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let mut wf = workflow(&tmp.path().join("enrollments.db"), true);

    let outcome = wf
        .enroll(EnrollmentRequest::new("Ana", "111", None, empty_room()))
        .unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected)
    );
    assert_eq!(wf.store().count().unwrap(), 0);
}

#[test]
fn verify_reflects_presence_and_claimed_identifier() {
    let tmp = TempDir::new().unwrap();
    let mut wf = workflow(&tmp.path().join("enrollments.db"), true);
    wf.enroll(EnrollmentRequest::new("Ana", "111", None, face_a()))
        .unwrap();

    assert_eq!(
        wf.verify(&face_a(), None).unwrap(),
        WorkflowOutcome::AccessGranted { record_id: None }
    );
    assert_eq!(
        wf.verify(&empty_room(), None).unwrap(),
        WorkflowOutcome::Rejected(RejectionReason::NoFaceDetected)
    );
    assert_eq!(
        wf.verify(&face_a(), Some("111")).unwrap(),
        WorkflowOutcome::AccessGranted { record_id: Some(1) }
    );
    assert_eq!(
        wf.verify(&face_a(), Some("222")).unwrap().code(),
        "not_enrolled"
    );
}

#[test]
fn salted_digest_strategy_reproduces_cosmetic_uniqueness() {
    let tmp = TempDir::new().unwrap();
    let mut wf = workflow(&tmp.path().join("enrollments.db"), false);

    for _ in 0..2 {
        let outcome = wf
            .enroll(EnrollmentRequest::new("Ana", "111", None, face_a()))
            .unwrap();
        assert!(outcome.is_success());
    }
    assert_eq!(wf.store().count().unwrap(), 2);
    assert_eq!(
        wf.verify(&face_a(), Some("111")).unwrap(),
        WorkflowOutcome::AccessGranted { record_id: Some(1) }
    );
}

#[test]
fn concurrent_enrollments_of_one_identifier_store_exactly_one_record() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("enrollments.db");
    workflow(&db, true).shutdown().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|kiosk| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut wf = workflow(&db, true);
                barrier.wait();
                wf.enroll(EnrollmentRequest::new(
                    format!("Kiosk {kiosk}"),
                    "12345678900",
                    None,
                    face_a(),
                ))
                .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let enrolled = outcomes.iter().filter(|o| o.is_success()).count();
    let duplicates = outcomes
        .iter()
        .filter(|o| o.rejection() == Some(RejectionReason::DuplicateIdentifier))
        .count();
    assert_eq!(enrolled, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(open_store(&db).count().unwrap(), 1);
}

#[test]
fn schema_setup_on_every_start_is_harmless() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("enrollments.db");
    {
        let mut wf = workflow(&db, true);
        wf.enroll(EnrollmentRequest::new("Ana", "111", None, face_a()))
            .unwrap();
        wf.shutdown().unwrap();
    }
    let wf = workflow(&db, true);
    assert_eq!(wf.store().count().unwrap(), 1);
}

#[test]
fn restarting_with_fingerprints_keeps_salted_digest_enrollments_unique() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("enrollments.db");
    {
        let mut wf = workflow(&db, false);
        assert!(wf
            .enroll(EnrollmentRequest::new("Ana", "111", None, face_a()))
            .unwrap()
            .is_success());
        wf.shutdown().unwrap();
    }

    let mut wf = workflow(&db, true);
    assert_eq!(
        wf.verify(&face_a(), Some("111")).unwrap(),
        WorkflowOutcome::AccessGranted { record_id: Some(1) }
    );
    assert_eq!(
        wf.enroll(EnrollmentRequest::new("Ana", "111", None, face_a()))
            .unwrap(),
        WorkflowOutcome::Rejected(RejectionReason::DuplicateIdentifier)
    );
    assert_eq!(wf.store().count().unwrap(), 1);
    assert_eq!(wf.store().unfingerprinted_digests().unwrap().len(), 1);
}
