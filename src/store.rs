//! Durable record store: the single source of truth for local capture state.
//!
//! Every mutation is one SQL statement or one transaction, so a reader never
//! sees a record half-updated (for example `SYNCING` with a stale hash).
//! Read-modify-write operations are additionally serialized through a
//! process-wide write lock.

use log::{debug, info};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Executor, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::constants::{generate_record_id, now_ms, RECORDING_SENTINEL};
use crate::db;
use crate::error::StoreError;
use crate::hashing::ContentHash;
use crate::lifecycle::RecordStatus;
use crate::model::{CaptureRecord, GpsFix, NewDetection, VehicleDetection};
use crate::queries::{detections, officer_sessions, records};
use crate::tags::{decode_tags, encode_tags, SystemTag, ViolationTag};

/// Result of attaching a fast-ping detection to a session
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    Attached(VehicleDetection),
    /// The session already has a vehicle with this identifier
    Duplicate,
    /// The session's recording has finished; late detections are dropped
    SessionClosed,
    /// No record carries this session id (e.g. aborted capture)
    NoSession,
}

/// Result of starting a recording under a pending-record ceiling
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    Created(CaptureRecord),
    /// `pending` DRAFT + SYNCING records already fill the ceiling
    AtCeiling { pending: u64 },
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    changes: Arc<watch::Sender<u64>>,
}

impl RecordStore {
    /// Open (creating or migrating as needed) the store at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let pool = db::open_database_connection(db_path).await?;
        db::init_database_schema(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap a pool whose schema is already initialized
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            changes: Arc::new(changes),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Receiver whose value is bumped after every committed mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<CaptureRecord>, StoreError> {
        fetch_record(&self.pool, &records::select_by_id(id)).await
    }

    pub async fn require(&self, id: &str) -> Result<CaptureRecord, StoreError> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CaptureRecord>, StoreError> {
        fetch_record(&self.pool, &records::select_by_session(session_id)).await
    }

    pub async fn list(&self) -> Result<Vec<CaptureRecord>, StoreError> {
        fetch_records(&self.pool, &records::select_all()).await
    }

    pub async fn list_by_status(
        &self,
        status: RecordStatus,
    ) -> Result<Vec<CaptureRecord>, StoreError> {
        fetch_records(&self.pool, &records::select_by_status(status)).await
    }

    /// Number of records not yet durably accepted by the server (DRAFT + SYNCING)
    pub async fn count_pending(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&records::count_pending())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Video paths owned by records (the recording sentinel is excluded)
    pub async fn video_paths(&self) -> Result<Vec<String>, StoreError> {
        let paths: Vec<String> = sqlx::query_scalar(&records::select_video_paths())
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    /// Ids of records whose video was never finalized
    pub async fn still_recording_ids(&self) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(&records::select_ids_still_recording())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn detections_for(
        &self,
        record_id: &str,
    ) -> Result<Vec<VehicleDetection>, StoreError> {
        let rows = sqlx::query(&detections::select_by_record(record_id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn get_detection(
        &self,
        id: &str,
    ) -> Result<Option<VehicleDetection>, StoreError> {
        let row = sqlx::query(&detections::select_by_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(detection_from_row).transpose()
    }

    /// Read a record and its children from one consistent snapshot
    pub async fn record_with_detections(
        &self,
        id: &str,
    ) -> Result<Option<(CaptureRecord, Vec<VehicleDetection>)>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let record = match fetch_record(&mut *tx, &records::select_by_id(id)).await? {
            Some(record) => record,
            None => return Ok(None),
        };
        let rows = sqlx::query(&detections::select_by_record(id))
            .fetch_all(&mut *tx)
            .await?;
        let children = rows
            .iter()
            .map(detection_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit().await?;
        Ok(Some((record, children)))
    }

    // ------------------------------------------------------------------
    // Record creation
    // ------------------------------------------------------------------

    /// Create the DRAFT for a recording that has just started. The video path
    /// holds the sentinel until `finalize_video`.
    pub async fn create_recording(
        &self,
        session_id: &str,
        gps: Option<GpsFix>,
    ) -> Result<CaptureRecord, StoreError> {
        let record = new_recording(session_id, gps);

        let _guard = self.write_lock.lock().await;
        self.insert_record(&record).await?;
        drop(_guard);

        self.notify();
        debug!("Created recording draft {} ({})", record.id, record.session_id);
        Ok(record)
    }

    /// Like `create_recording`, but only while fewer than `ceiling` records
    /// are pending. The count and the insert happen under the write lock, so
    /// concurrent starts cannot overshoot the ceiling.
    pub async fn create_recording_below(
        &self,
        ceiling: u64,
        session_id: &str,
        gps: Option<GpsFix>,
    ) -> Result<AdmitOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let pending = self.count_pending().await?;
        if pending >= ceiling {
            return Ok(AdmitOutcome::AtCeiling { pending });
        }
        let record = new_recording(session_id, gps);
        self.insert_record(&record).await?;
        drop(_guard);

        self.notify();
        debug!(
            "Created recording draft {} ({}), {} of {} pending",
            record.id,
            record.session_id,
            pending + 1,
            ceiling
        );
        Ok(AdmitOutcome::Created(record))
    }

    /// Create a DRAFT for an already finished and hashed video (orphan adoption)
    pub async fn adopt_video(
        &self,
        session_id: &str,
        path: &str,
        video_hash: ContentHash,
        system_tags: BTreeSet<SystemTag>,
    ) -> Result<CaptureRecord, StoreError> {
        let path = resolve_video_path(path).await?;
        let now = now_ms();
        let record = CaptureRecord {
            id: generate_record_id(),
            session_id: session_id.to_string(),
            status: RecordStatus::Draft,
            local_video_path: path.clone(),
            video_hash: Some(video_hash),
            gps: None,
            manual_tags: BTreeSet::new(),
            system_tags,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let _guard = self.write_lock.lock().await;
        self.ensure_path_free(&path, &record.id).await?;
        self.insert_record(&record).await?;
        drop(_guard);

        self.notify();
        Ok(record)
    }

    async fn insert_record(&self, record: &CaptureRecord) -> Result<(), StoreError> {
        let sql = records::insert(
            record,
            &encode_tags(&record.manual_tags)?,
            &encode_tags(&record.system_tags)?,
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_path_free(&self, path: &str, claimant: &str) -> Result<(), StoreError> {
        let owner: Option<String> = sqlx::query_scalar(&records::select_id_by_path(path))
            .fetch_optional(&self.pool)
            .await?;
        match owner {
            Some(owner) if owner != claimant => Err(StoreError::PathAlreadyOwned {
                path: path.to_string(),
                owner,
            }),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Capture pipeline writes
    // ------------------------------------------------------------------

    /// Replace the sentinel with the finished file and its hash in one write.
    ///
    /// The path is stored in canonical form, so aliases of one file (relative
    /// paths, `.` and `..` components, symlinks) map to a single owner.
    pub async fn finalize_video(
        &self,
        id: &str,
        path: &str,
        video_hash: &ContentHash,
    ) -> Result<CaptureRecord, StoreError> {
        if path == RECORDING_SENTINEL {
            return Err(StoreError::StillRecording(id.to_string()));
        }
        let path = resolve_video_path(path).await?;

        let _guard = self.write_lock.lock().await;
        self.ensure_path_free(&path, id).await?;

        let sql = records::finalize_video(id, &path, video_hash.as_str(), now_ms());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let record = self.require(id).await?;
            if record.status != RecordStatus::Draft {
                return Err(StoreError::StatusConflict {
                    id: id.to_string(),
                    expected: RecordStatus::Draft,
                    actual: record.status,
                });
            }
            return Err(StoreError::NotRecording(id.to_string()));
        }
        let record = self.require(id).await?;
        drop(_guard);

        self.notify();
        Ok(record)
    }

    pub async fn delete_record(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(&records::delete_by_id(id))
            .execute(&self.pool)
            .await?;
        drop(_guard);

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.notify();
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// DRAFT -> SYNCING. Acts as the per-record upload mutex: a second
    /// caller finds the record already SYNCING and is rejected.
    pub async fn begin_upload(&self, id: &str) -> Result<CaptureRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self.require(id).await?;
        let next = record.status.transition(RecordStatus::Syncing).map_err(|_| {
            StoreError::StatusConflict {
                id: id.to_string(),
                expected: RecordStatus::Draft,
                actual: record.status,
            }
        })?;
        if record.is_recording() {
            return Err(StoreError::StillRecording(id.to_string()));
        }
        let hash = record
            .video_hash
            .clone()
            .ok_or_else(|| StoreError::MissingHash(id.to_string()))?;

        let sql = records::update_status_for_hash(
            id,
            RecordStatus::Draft,
            next,
            hash.as_str(),
            now_ms(),
        );
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(id, RecordStatus::Draft).await);
        }
        let record = self.require(id).await?;
        drop(_guard);

        self.notify();
        info!("[{}] DRAFT -> SYNCING", id);
        Ok(record)
    }

    /// SYNCING -> UPLOADED, only while the record still carries the hash the
    /// server acknowledged
    pub async fn confirm_upload(
        &self,
        id: &str,
        video_hash: &ContentHash,
    ) -> Result<(), StoreError> {
        RecordStatus::Syncing.transition(RecordStatus::Uploaded)?;

        let _guard = self.write_lock.lock().await;
        let sql = records::update_status_for_hash(
            id,
            RecordStatus::Syncing,
            RecordStatus::Uploaded,
            video_hash.as_str(),
            now_ms(),
        );
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(id, RecordStatus::Syncing).await);
        }
        drop(_guard);

        self.notify();
        info!("[{}] SYNCING -> UPLOADED ({})", id, video_hash.short());
        Ok(())
    }

    /// SYNCING -> DRAFT after a failed attempt
    pub async fn rollback_upload(&self, id: &str) -> Result<(), StoreError> {
        RecordStatus::Syncing.transition(RecordStatus::Draft)?;

        let _guard = self.write_lock.lock().await;
        let sql = records::update_status(id, RecordStatus::Syncing, RecordStatus::Draft, now_ms());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(id, RecordStatus::Syncing).await);
        }
        drop(_guard);

        self.notify();
        info!("[{}] SYNCING -> DRAFT", id);
        Ok(())
    }

    /// Force every SYNCING record back to DRAFT. Only valid at startup, when
    /// no upload can be in flight.
    pub async fn recover_stuck_uploads(&self) -> Result<u64, StoreError> {
        RecordStatus::Syncing.transition(RecordStatus::Draft)?;

        let _guard = self.write_lock.lock().await;
        let sql = records::update_all_status(RecordStatus::Syncing, RecordStatus::Draft, now_ms());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        drop(_guard);

        let count = result.rows_affected();
        if count > 0 {
            self.notify();
        }
        Ok(count)
    }

    async fn conflict(&self, id: &str, expected: RecordStatus) -> StoreError {
        match self.get(id).await {
            Ok(Some(record)) if record.status == expected => {
                StoreError::HashChanged(id.to_string())
            }
            Ok(Some(record)) => StoreError::StatusConflict {
                id: id.to_string(),
                expected,
                actual: record.status,
            },
            Ok(None) => StoreError::RecordNotFound(id.to_string()),
            Err(e) => e,
        }
    }

    // ------------------------------------------------------------------
    // Tags and detections
    // ------------------------------------------------------------------

    /// Replace the officer's tags on a DRAFT record
    pub async fn set_manual_tags(
        &self,
        id: &str,
        tags: &BTreeSet<ViolationTag>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let sql = records::update_manual_tags(id, &encode_tags(tags)?, now_ms());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let record = self.require(id).await?;
            return Err(StoreError::NotEditable {
                id: id.to_string(),
                status: record.status,
            });
        }
        drop(_guard);

        self.notify();
        Ok(())
    }

    /// Union new system tags into a record; existing tags are never removed
    pub async fn add_system_tags(
        &self,
        id: &str,
        tags: &BTreeSet<SystemTag>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self.require(id).await?;
        let merged: BTreeSet<SystemTag> = record.system_tags.union(tags).copied().collect();
        if merged != record.system_tags {
            let sql = records::update_system_tags(id, &encode_tags(&merged)?, now_ms());
            sqlx::query(&sql).execute(&self.pool).await?;
            drop(_guard);
            self.notify();
        }
        Ok(())
    }

    /// Add or remove one tag on a vehicle; the parent must still be a DRAFT
    pub async fn toggle_detection_tag(
        &self,
        detection_id: &str,
        tag: ViolationTag,
    ) -> Result<VehicleDetection, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut detection = self
            .get_detection(detection_id)
            .await?
            .ok_or_else(|| StoreError::DetectionNotFound(detection_id.to_string()))?;
        let parent = self.require(&detection.capture_record_id).await?;
        if !parent.status.is_editable() {
            return Err(StoreError::NotEditable {
                id: parent.id,
                status: parent.status,
            });
        }

        if !detection.manual_tags.remove(&tag) {
            detection.manual_tags.insert(tag);
        }
        let now = now_ms();
        let sql = detections::update_manual_tags(
            detection_id,
            &encode_tags(&detection.manual_tags)?,
            now,
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        detection.updated_at_ms = now;
        drop(_guard);

        self.notify();
        Ok(detection)
    }

    /// Persist a detection under the record that owns `session_id`.
    ///
    /// The parent is resolved by session id inside the same transaction as the
    /// insert, and only while that session is still recording.
    pub async fn attach_detection(
        &self,
        session_id: &str,
        detection: NewDetection,
    ) -> Result<AttachOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let parent = fetch_record(&mut *tx, &records::select_by_session(session_id)).await?;
        let record = match parent {
            Some(record) => record,
            None => return Ok(AttachOutcome::NoSession),
        };
        if !record.is_recording() || record.status != RecordStatus::Draft {
            return Ok(AttachOutcome::SessionClosed);
        }

        let now = now_ms();
        let child = VehicleDetection {
            id: generate_record_id(),
            capture_record_id: record.id.clone(),
            vehicle_identifier: detection.vehicle_identifier,
            vehicle_class: detection.vehicle_class,
            thumbnail_uri: detection.thumbnail_uri,
            manual_tags: BTreeSet::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        let sql = detections::insert_or_ignore(&child, &encode_tags(&child.manual_tags)?);
        let inserted = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
        if inserted == 0 {
            return Ok(AttachOutcome::Duplicate);
        }

        if !record.system_tags.contains(&child.vehicle_class) {
            let mut merged = record.system_tags.clone();
            merged.insert(child.vehicle_class);
            let sql = records::update_system_tags(&record.id, &encode_tags(&merged)?, now);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        drop(_guard);

        self.notify();
        Ok(AttachOutcome::Attached(child))
    }

    // ------------------------------------------------------------------
    // Officer sessions
    // ------------------------------------------------------------------

    pub async fn record_officer_session(&self, officer_id: &str) -> Result<(), StoreError> {
        let sql = officer_sessions::insert(officer_id, now_ms());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Most recent (officer_id, started_at_ms)
    pub async fn latest_officer_session(&self) -> Result<Option<(String, i64)>, StoreError> {
        let row = sqlx::query(&officer_sessions::select_latest())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get(0)?, row.try_get(1)?))),
            None => Ok(None),
        }
    }
}

fn new_recording(session_id: &str, gps: Option<GpsFix>) -> CaptureRecord {
    let now = now_ms();
    CaptureRecord {
        id: generate_record_id(),
        session_id: session_id.to_string(),
        status: RecordStatus::Draft,
        local_video_path: RECORDING_SENTINEL.to_string(),
        video_hash: None,
        gps,
        manual_tags: BTreeSet::new(),
        system_tags: BTreeSet::new(),
        created_at_ms: now,
        updated_at_ms: now,
    }
}

/// Canonical absolute form of a finished video's path. The file must exist.
async fn resolve_video_path(path: &str) -> Result<String, StoreError> {
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|source| StoreError::VideoPath {
            path: path.to_string(),
            source,
        })?;
    Ok(canonical.to_string_lossy().into_owned())
}

async fn fetch_record<'e, E>(
    executor: E,
    sql: &str,
) -> Result<Option<CaptureRecord>, StoreError>
where
    E: Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query(sql).fetch_optional(executor).await?;
    row.as_ref().map(record_from_row).transpose()
}

async fn fetch_records<'e, E>(
    executor: E,
    sql: &str,
) -> Result<Vec<CaptureRecord>, StoreError>
where
    E: Executor<'e, Database = sqlx::Sqlite>,
{
    let rows = sqlx::query(sql).fetch_all(executor).await?;
    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<CaptureRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "capture_records",
        id: id.clone(),
        reason,
    };

    let status_raw: String = row.try_get("status")?;
    let status = status_raw.parse::<RecordStatus>().map_err(corrupt)?;

    let video_hash = match row.try_get::<Option<String>, _>("video_hash")? {
        Some(raw) if !raw.is_empty() => Some(
            ContentHash::from_hex(&raw)
                .ok_or_else(|| corrupt(format!("invalid video hash '{}'", raw)))?,
        ),
        _ => None,
    };

    let gps = match (
        row.try_get::<Option<f64>, _>("gps_lat")?,
        row.try_get::<Option<f64>, _>("gps_lng")?,
    ) {
        (Some(lat), Some(lng)) => Some(GpsFix { lat, lng }),
        _ => None,
    };

    let manual_raw: String = row.try_get("manual_tags")?;
    let manual_tags =
        decode_tags(&manual_raw).map_err(|e| corrupt(format!("manual_tags: {}", e)))?;
    let system_raw: String = row.try_get("system_tags")?;
    let system_tags =
        decode_tags(&system_raw).map_err(|e| corrupt(format!("system_tags: {}", e)))?;

    Ok(CaptureRecord {
        session_id: row.try_get("session_id")?,
        status,
        local_video_path: row.try_get("local_video_path")?,
        video_hash,
        gps,
        manual_tags,
        system_tags,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
        id,
    })
}

fn detection_from_row(row: &SqliteRow) -> Result<VehicleDetection, StoreError> {
    let id: String = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "vehicle_detections",
        id: id.clone(),
        reason,
    };

    let class_raw: String = row.try_get("vehicle_class")?;
    let vehicle_class: SystemTag =
        serde_json::from_value(serde_json::Value::String(class_raw.clone()))
            .map_err(|_| corrupt(format!("unknown vehicle class '{}'", class_raw)))?;

    let manual_raw: String = row.try_get("manual_tags")?;
    let manual_tags =
        decode_tags(&manual_raw).map_err(|e| corrupt(format!("manual_tags: {}", e)))?;

    Ok(VehicleDetection {
        capture_record_id: row.try_get("capture_record_id")?,
        vehicle_identifier: row.try_get("vehicle_identifier")?,
        vehicle_class,
        thumbnail_uri: row.try_get("thumbnail_uri")?,
        manual_tags,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
        id,
    })
}
