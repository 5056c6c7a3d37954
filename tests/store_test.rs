use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use evidence_sync::constants::{generate_session_id, RECORDING_SENTINEL, SESSION_PREFIX};
use evidence_sync::error::StoreError;
use evidence_sync::hashing::{hash_bytes, hash_file};
use evidence_sync::lifecycle::RecordStatus;
use evidence_sync::model::{CaptureRecord, GpsFix, NewDetection};
use evidence_sync::store::{AdmitOutcome, AttachOutcome, RecordStore};
use evidence_sync::tags::{SystemTag, ViolationTag};

async fn open_store() -> (RecordStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(&dir.path().join("evidence.sqlite"))
        .await
        .unwrap();
    (store, dir)
}

fn write_video(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Create a recording and finalize it with a real file
async fn finished_draft(store: &RecordStore, dir: &Path, name: &str) -> CaptureRecord {
    let record = store
        .create_recording(&generate_session_id(SESSION_PREFIX), None)
        .await
        .unwrap();
    let path = write_video(dir, name, format!("video bytes of {}", name).as_bytes());
    let hash = hash_file(&path).unwrap();
    store
        .finalize_video(&record.id, &path.to_string_lossy(), &hash)
        .await
        .unwrap()
}

fn car(identifier: &str) -> NewDetection {
    NewDetection {
        vehicle_identifier: identifier.to_string(),
        vehicle_class: SystemTag::Car,
        thumbnail_uri: None,
    }
}

#[tokio::test]
async fn test_record_exists_from_recording_start() {
    let (store, _dir) = open_store().await;
    let gps = GpsFix {
        lat: 12.9716,
        lng: 77.5946,
    };
    let record = store
        .create_recording("SESSION_1_abcdef", Some(gps))
        .await
        .unwrap();

    let loaded = store.find_by_session("SESSION_1_abcdef").await.unwrap().unwrap();
    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.status, RecordStatus::Draft);
    assert_eq!(loaded.local_video_path, RECORDING_SENTINEL);
    assert!(loaded.is_recording());
    assert!(loaded.video_hash.is_none());
    assert_eq!(loaded.gps, Some(gps));
    assert!(loaded.manual_tags.is_empty());

    assert_eq!(store.still_recording_ids().await.unwrap(), vec![record.id]);
    assert!(store.video_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_sets_path_and_hash_together() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "a.mp4").await;

    assert!(!record.is_recording());
    assert_eq!(record.status, RecordStatus::Draft);
    let expected = hash_file(&dir.path().join("a.mp4")).unwrap();
    assert_eq!(record.video_hash, Some(expected.clone()));

    // Second finalize finds no sentinel
    let other = write_video(dir.path(), "b.mp4", b"another clip");
    let again = store
        .finalize_video(&record.id, &other.to_string_lossy(), &expected)
        .await;
    assert!(matches!(again, Err(StoreError::NotRecording(_))));
}

#[tokio::test]
async fn test_video_path_ownership_is_exclusive() {
    let (store, dir) = open_store().await;
    let first = finished_draft(&store, dir.path(), "shared.mp4").await;

    let second = store
        .create_recording(&generate_session_id(SESSION_PREFIX), None)
        .await
        .unwrap();
    let result = store
        .finalize_video(
            &second.id,
            &first.local_video_path,
            first.video_hash.as_ref().unwrap(),
        )
        .await;
    match result {
        Err(StoreError::PathAlreadyOwned { owner, .. }) => assert_eq!(owner, first.id),
        other => panic!("expected PathAlreadyOwned, got {:?}", other),
    }

    // The loser is untouched and still recording
    assert!(store.require(&second.id).await.unwrap().is_recording());
}

#[tokio::test]
async fn test_aliases_of_one_file_have_one_owner() {
    let (store, dir) = open_store().await;
    let first = finished_draft(&store, dir.path(), "a.mp4").await;
    let hash = first.video_hash.clone().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let mut aliases = vec![
        dir.path().join(".").join("a.mp4"),
        dir.path().join("sub").join("..").join("a.mp4"),
    ];
    #[cfg(unix)]
    {
        let link = dir.path().join("link.mp4");
        std::os::unix::fs::symlink(dir.path().join("a.mp4"), &link).unwrap();
        aliases.push(link);
    }

    for alias in aliases {
        let claimant = store
            .create_recording(&generate_session_id(SESSION_PREFIX), None)
            .await
            .unwrap();
        match store
            .finalize_video(&claimant.id, &alias.to_string_lossy(), &hash)
            .await
        {
            Err(StoreError::PathAlreadyOwned { owner, .. }) => assert_eq!(owner, first.id),
            other => panic!("{} should be owned already, got {:?}", alias.display(), other),
        }
        assert!(store.require(&claimant.id).await.unwrap().is_recording());

        let adopted = store
            .adopt_video(
                &generate_session_id(SESSION_PREFIX),
                &alias.to_string_lossy(),
                hash.clone(),
                BTreeSet::new(),
            )
            .await;
        assert!(matches!(adopted, Err(StoreError::PathAlreadyOwned { .. })));
    }

    let canonical = dir.path().join("a.mp4").canonicalize().unwrap();
    assert_eq!(PathBuf::from(&first.local_video_path), canonical);
    assert_eq!(
        store.video_paths().await.unwrap(),
        vec![canonical.to_string_lossy().into_owned()]
    );
}

#[tokio::test]
async fn test_finalize_rejects_missing_file() {
    let (store, dir) = open_store().await;
    let record = store
        .create_recording(&generate_session_id(SESSION_PREFIX), None)
        .await
        .unwrap();
    let missing = dir.path().join("never_written.mp4");
    let result = store
        .finalize_video(&record.id, &missing.to_string_lossy(), &hash_bytes(b"x"))
        .await;
    assert!(matches!(result, Err(StoreError::VideoPath { .. })));
    assert!(store.require(&record.id).await.unwrap().is_recording());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_never_exceed_ceiling() {
    let (store, _dir) = open_store().await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_recording_below(3, &generate_session_id(SESSION_PREFIX), None)
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AdmitOutcome::Created(_) => created += 1,
            AdmitOutcome::AtCeiling { pending } => assert_eq!(pending, 3),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(store.count_pending().await.unwrap(), 3);
}

#[tokio::test]
async fn test_begin_upload_requires_finished_video() {
    let (store, _dir) = open_store().await;
    let record = store
        .create_recording(&generate_session_id(SESSION_PREFIX), None)
        .await
        .unwrap();

    let result = store.begin_upload(&record.id).await;
    assert!(matches!(result, Err(StoreError::StillRecording(_))));
    assert_eq!(
        store.require(&record.id).await.unwrap().status,
        RecordStatus::Draft
    );
}

#[tokio::test]
async fn test_concurrent_begin_upload_admits_one() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "race.mp4").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = record.id.clone();
        handles.push(tokio::spawn(async move { store.begin_upload(&id).await }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(r) => {
                assert_eq!(r.status, RecordStatus::Syncing);
                admitted += 1;
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                assert_eq!(actual, RecordStatus::Syncing)
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_confirm_requires_syncing_and_matching_hash() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "confirm.mp4").await;
    let hash = record.video_hash.clone().unwrap();

    // No DRAFT -> UPLOADED shortcut
    assert!(store.confirm_upload(&record.id, &hash).await.is_err());
    assert_eq!(
        store.require(&record.id).await.unwrap().status,
        RecordStatus::Draft
    );

    store.begin_upload(&record.id).await.unwrap();
    let wrong = hash_bytes(b"some other video");
    assert!(matches!(
        store.confirm_upload(&record.id, &wrong).await,
        Err(StoreError::HashChanged(_))
    ));
    assert_eq!(
        store.require(&record.id).await.unwrap().status,
        RecordStatus::Syncing
    );

    store.confirm_upload(&record.id, &hash).await.unwrap();
    let uploaded = store.require(&record.id).await.unwrap();
    assert_eq!(uploaded.status, RecordStatus::Uploaded);
    assert_eq!(uploaded.video_hash, Some(hash));
}

#[tokio::test]
async fn test_uploaded_is_terminal_and_immutable() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "done.mp4").await;
    let hash = record.video_hash.clone().unwrap();
    store.begin_upload(&record.id).await.unwrap();
    store.confirm_upload(&record.id, &hash).await.unwrap();

    assert!(store.rollback_upload(&record.id).await.is_err());
    assert!(store.begin_upload(&record.id).await.is_err());

    let tags: BTreeSet<ViolationTag> = [ViolationTag::NoHelmet].into_iter().collect();
    assert!(matches!(
        store.set_manual_tags(&record.id, &tags).await,
        Err(StoreError::NotEditable {
            status: RecordStatus::Uploaded,
            ..
        })
    ));

    // Startup recovery never touches it
    assert_eq!(store.recover_stuck_uploads().await.unwrap(), 0);
    assert_eq!(
        store.require(&record.id).await.unwrap().status,
        RecordStatus::Uploaded
    );
}

#[tokio::test]
async fn test_rollback_keeps_hash() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "rollback.mp4").await;
    store.begin_upload(&record.id).await.unwrap();
    store.rollback_upload(&record.id).await.unwrap();

    let after = store.require(&record.id).await.unwrap();
    assert_eq!(after.status, RecordStatus::Draft);
    assert_eq!(after.video_hash, record.video_hash);
    assert_eq!(after.local_video_path, record.local_video_path);

    // Nothing left to roll back
    assert!(store.rollback_upload(&record.id).await.is_err());
}

#[tokio::test]
async fn test_detections_attach_by_session_and_dedup() {
    let (store, _dir) = open_store().await;
    let record = store
        .create_recording("SESSION_2_zzzzzz", None)
        .await
        .unwrap();

    let first = store
        .attach_detection("SESSION_2_zzzzzz", car("car_1"))
        .await
        .unwrap();
    assert!(matches!(first, AttachOutcome::Attached(_)));
    let duplicate = store
        .attach_detection("SESSION_2_zzzzzz", car("car_1"))
        .await
        .unwrap();
    assert_eq!(duplicate, AttachOutcome::Duplicate);

    let bus = NewDetection {
        vehicle_identifier: "bus_4".to_string(),
        vehicle_class: SystemTag::Bus,
        thumbnail_uri: Some("thumbs/bus_4.jpg".to_string()),
    };
    store.attach_detection("SESSION_2_zzzzzz", bus).await.unwrap();

    let (loaded, children) = store
        .record_with_detections(&record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.capture_record_id == record.id));
    let expected: BTreeSet<SystemTag> = [SystemTag::Car, SystemTag::Bus].into_iter().collect();
    assert_eq!(loaded.system_tags, expected);

    assert_eq!(
        store.attach_detection("SESSION_unknown", car("car_9")).await.unwrap(),
        AttachOutcome::NoSession
    );
}

#[tokio::test]
async fn test_detection_after_session_finished_is_dropped() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "closed.mp4").await;

    let outcome = store
        .attach_detection(&record.session_id, car("car_late"))
        .await
        .unwrap();
    assert_eq!(outcome, AttachOutcome::SessionClosed);
    assert!(store.detections_for(&record.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_vehicle_tags_toggle_until_upload() {
    let (store, dir) = open_store().await;
    let record = store
        .create_recording("SESSION_3_tagged", None)
        .await
        .unwrap();
    let child = match store
        .attach_detection("SESSION_3_tagged", car("car_1"))
        .await
        .unwrap()
    {
        AttachOutcome::Attached(child) => child,
        other => panic!("expected attach, got {:?}", other),
    };

    let tagged = store
        .toggle_detection_tag(&child.id, ViolationTag::WrongSide)
        .await
        .unwrap();
    assert!(tagged.manual_tags.contains(&ViolationTag::WrongSide));
    let untagged = store
        .toggle_detection_tag(&child.id, ViolationTag::WrongSide)
        .await
        .unwrap();
    assert!(untagged.manual_tags.is_empty());
    store
        .toggle_detection_tag(&child.id, ViolationTag::NoHelmet)
        .await
        .unwrap();

    // Finish and upload, after which vehicle tags are frozen
    let path = write_video(dir.path(), "tagged.mp4", b"tagged video");
    let hash = hash_file(&path).unwrap();
    store
        .finalize_video(&record.id, &path.to_string_lossy(), &hash)
        .await
        .unwrap();
    store.begin_upload(&record.id).await.unwrap();

    assert!(matches!(
        store
            .toggle_detection_tag(&child.id, ViolationTag::NoHelmet)
            .await,
        Err(StoreError::NotEditable {
            status: RecordStatus::Syncing,
            ..
        })
    ));
    let stored = store.get_detection(&child.id).await.unwrap().unwrap();
    let expected: BTreeSet<ViolationTag> = [ViolationTag::NoHelmet].into_iter().collect();
    assert_eq!(stored.manual_tags, expected);
}

#[tokio::test]
async fn test_deleting_record_cascades_to_detections() {
    let (store, _dir) = open_store().await;
    let record = store
        .create_recording("SESSION_4_cascade", None)
        .await
        .unwrap();
    store
        .attach_detection("SESSION_4_cascade", car("car_1"))
        .await
        .unwrap();

    assert!(store.delete_record(&record.id).await.unwrap());
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_detections")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(!store.delete_record(&record.id).await.unwrap());
}

#[tokio::test]
async fn test_every_mutation_notifies_subscribers() {
    let (store, dir) = open_store().await;
    let mut changes = store.subscribe();
    let start = *changes.borrow_and_update();

    let record = finished_draft(&store, dir.path(), "notify.mp4").await;
    assert!(changes.has_changed().unwrap());
    let after_create = *changes.borrow_and_update();
    assert_eq!(after_create, start + 2);

    store.begin_upload(&record.id).await.unwrap();
    store.rollback_upload(&record.id).await.unwrap();
    assert_eq!(*changes.borrow_and_update(), after_create + 2);
}

#[tokio::test]
async fn test_unknown_stored_tag_is_reported_as_corruption() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "corrupt.mp4").await;
    sqlx::query("UPDATE capture_records SET manual_tags = '[\"JAYWALKING\"]' WHERE id = ?")
        .bind(&record.id)
        .execute(store.pool())
        .await
        .unwrap();

    match store.get(&record.id).await {
        Err(StoreError::Corrupt { table, id, .. }) => {
            assert_eq!(table, "capture_records");
            assert_eq!(id, record.id);
        }
        other => panic!("expected Corrupt, got {:?}", other),
    }
}

#[tokio::test]
async fn test_officer_sessions_are_logged() {
    let (store, _dir) = open_store().await;
    assert!(store.latest_officer_session().await.unwrap().is_none());
    store.record_officer_session("OFC-1").await.unwrap();
    store.record_officer_session("OFC-2").await.unwrap();
    let (officer, _started) = store.latest_officer_session().await.unwrap().unwrap();
    assert_eq!(officer, "OFC-2");
}

#[tokio::test]
async fn test_system_tags_only_grow() {
    let (store, dir) = open_store().await;
    let record = finished_draft(&store, dir.path(), "grow.mp4").await;

    let first: BTreeSet<SystemTag> = [SystemTag::Truck].into_iter().collect();
    store.add_system_tags(&record.id, &first).await.unwrap();
    let second: BTreeSet<SystemTag> = [SystemTag::Scooter].into_iter().collect();
    store.add_system_tags(&record.id, &second).await.unwrap();

    let expected: BTreeSet<SystemTag> =
        [SystemTag::Truck, SystemTag::Scooter].into_iter().collect();
    assert_eq!(store.require(&record.id).await.unwrap().system_tags, expected);
}
