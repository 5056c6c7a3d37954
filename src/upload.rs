//! Heavy upload channel.
//!
//! Order of operations for one record:
//! 1. already `UPLOADED` → success, no network call
//! 2. offline → fail fast, status untouched
//! 3. preconditions (DRAFT, finished video on disk, hash present)
//! 4. `DRAFT -> SYNCING` (rejects a concurrent second attempt)
//! 5. re-hash the video and compare with the stored hash
//! 6. transmit
//! 7. 2xx → `SYNCING -> UPLOADED` for that hash; anything else → `SYNCING -> DRAFT`
//!
//! Nothing here retries on its own.

use log::{error, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{StoreError, UploadError};
use crate::hashing::{hash_file_async, ContentHash};
use crate::lifecycle::RecordStatus;
use crate::model::{CaptureRecord, UploadManifest};
use crate::store::RecordStore;
use crate::tags::{join_tags, SystemTag, ViolationTag};

/// Shared online/offline flag fed by whatever watches the device's network
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        record_id: String,
        video_hash: ContentHash,
    },
    /// The record was already accepted earlier; nothing was sent
    AlreadyUploaded,
}

#[derive(Debug, Default)]
pub struct SubmitReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<(String, UploadError)>,
}

#[derive(Clone)]
pub struct HeavyUploader {
    store: RecordStore,
    client: Client,
    endpoint: Url,
    connectivity: Connectivity,
}

impl HeavyUploader {
    pub fn new(
        store: RecordStore,
        endpoint: Url,
        timeout: Duration,
        connectivity: Connectivity,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            store,
            client,
            endpoint,
            connectivity,
        })
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Collect the record and the union of its own and its vehicles' tags
    pub async fn manifest(&self, record_id: &str) -> Result<UploadManifest, UploadError> {
        let (record, detections) = self
            .store
            .record_with_detections(record_id)
            .await?
            .ok_or_else(|| UploadError::RecordNotFound(record_id.to_string()))?;
        let video_hash = record
            .video_hash
            .clone()
            .ok_or_else(|| UploadError::MissingHash(record_id.to_string()))?;

        let mut manual_tags: BTreeSet<ViolationTag> = record.manual_tags.clone();
        for detection in &detections {
            manual_tags.extend(detection.manual_tags.iter().copied());
        }
        Ok(UploadManifest {
            record,
            video_hash,
            manual_tags,
        })
    }

    pub async fn upload(
        &self,
        record_id: &str,
        officer_id: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let record = self
            .store
            .get(record_id)
            .await?
            .ok_or_else(|| UploadError::RecordNotFound(record_id.to_string()))?;
        if record.status == RecordStatus::Uploaded {
            info!("[Upload] {} already uploaded, skipping", record_id);
            return Ok(UploadOutcome::AlreadyUploaded);
        }

        if !self.connectivity.is_online() {
            info!("[Upload] {} deferred: offline", record_id);
            return Err(UploadError::Offline);
        }

        check_preconditions(&record)?;

        let record = self.store.begin_upload(record_id).await.map_err(|e| match e {
            StoreError::StatusConflict { id, actual, .. } => UploadError::NotUploadable {
                id,
                status: actual,
            },
            StoreError::StillRecording(id) => UploadError::StillRecording(id),
            StoreError::MissingHash(id) => UploadError::MissingHash(id),
            other => UploadError::Store(other),
        })?;

        match self.transmit(&record, officer_id).await {
            Ok(video_hash) => {
                self.store.confirm_upload(record_id, &video_hash).await?;
                info!("[Upload] {} accepted ({})", record_id, video_hash.short());
                Ok(UploadOutcome::Uploaded {
                    record_id: record_id.to_string(),
                    video_hash,
                })
            }
            Err(e) => {
                warn!("[Upload] {} failed, rolling back to DRAFT: {}", record_id, e);
                if let Err(rollback) = self.store.rollback_upload(record_id).await {
                    error!("[Upload] {} rollback failed: {}", record_id, rollback);
                }
                Err(e)
            }
        }
    }

    /// Everything between SYNCING and the server's verdict
    async fn transmit(
        &self,
        record: &CaptureRecord,
        officer_id: &str,
    ) -> Result<ContentHash, UploadError> {
        let manifest = self.manifest(&record.id).await?;
        let path = Path::new(&record.local_video_path).to_path_buf();

        let actual = hash_file_async(path.clone()).await?;
        if actual != manifest.video_hash {
            return Err(UploadError::IntegrityMismatch {
                id: record.id.clone(),
                expected: manifest.video_hash.to_string(),
                actual: actual.to_string(),
            });
        }

        let video = tokio::fs::read(&path).await.map_err(|_| UploadError::VideoMissing {
            id: record.id.clone(),
            path: record.local_video_path.clone(),
        })?;
        let video_part = Part::bytes(video)
            .file_name(format!("evidence_{}.mp4", record.session_id))
            .mime_str("video/mp4")?;

        let system_tags = record
            .system_tags
            .iter()
            .map(SystemTag::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let form = Form::new()
            .text("session_id", record.session_id.clone())
            .text("officer_id", officer_id.to_string())
            .text("manual_tags", join_tags(&manifest.manual_tags))
            .text("system_tags", system_tags)
            .text("video_hash", manifest.video_hash.to_string())
            .part("video", video_part);

        info!(
            "[Upload] {} sending {} as {}",
            record.id,
            manifest.video_hash.short(),
            record.session_id
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(manifest.video_hash)
    }

    /// Upload every finished DRAFT after checking that no session with
    /// detected vehicles is left completely untagged. Sessions still
    /// recording are neither checked nor sent. One failure does not stop the
    /// rest.
    pub async fn submit_drafts(&self, officer_id: &str) -> Result<SubmitReport, UploadError> {
        let drafts: Vec<CaptureRecord> = self
            .store
            .list_by_status(RecordStatus::Draft)
            .await?
            .into_iter()
            .filter(|record| !record.is_recording())
            .collect();

        for record in &drafts {
            let detections = self.store.detections_for(&record.id).await?;
            if !detections.is_empty() && detections.iter().all(|d| d.manual_tags.is_empty()) {
                return Err(UploadError::MissingTags(record.session_id.clone()));
            }
        }

        let mut report = SubmitReport::default();
        for record in drafts {
            match self.upload(&record.id, officer_id).await {
                Ok(_) => report.uploaded.push(record.id),
                Err(e) => report.failed.push((record.id, e)),
            }
        }
        info!(
            "[Upload] Submit finished: {} uploaded, {} failed",
            report.uploaded.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn check_preconditions(record: &CaptureRecord) -> Result<(), UploadError> {
    if record.status != RecordStatus::Draft {
        return Err(UploadError::NotUploadable {
            id: record.id.clone(),
            status: record.status,
        });
    }
    if record.is_recording() {
        return Err(UploadError::StillRecording(record.id.clone()));
    }
    if record.video_hash.is_none() {
        return Err(UploadError::MissingHash(record.id.clone()));
    }
    if !Path::new(&record.local_video_path).is_file() {
        return Err(UploadError::VideoMissing {
            id: record.id.clone(),
            path: record.local_video_path.clone(),
        });
    }
    Ok(())
}
