//! The capture pipeline: one configurable path from "record pressed" to a
//! finalized, hashed DRAFT.

use log::{error, info, warn};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;

use crate::backpressure::BackpressureGate;
use crate::constants::{generate_session_id, SESSION_PREFIX};
use crate::error::CaptureError;
use crate::hashing::hash_file_async;
use crate::model::{CaptureRecord, GpsFix};
use crate::ping::{
    spawn_ping_worker, FrameSample, PingClient, PingStats, PingWorker, SessionContext,
};
use crate::store::RecordStore;
use crate::upload::{HeavyUploader, UploadOutcome};

/// A recording in progress. Frames pushed here are picked up by the ping
/// worker at its own pace; pushing never waits.
pub struct ActiveCapture {
    record: CaptureRecord,
    frames: watch::Sender<Option<FrameSample>>,
    ping: Option<PingWorker>,
}

impl ActiveCapture {
    pub fn record_id(&self) -> &str {
        &self.record.id
    }

    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }

    pub fn record(&self) -> &CaptureRecord {
        &self.record
    }

    /// Offer the latest camera frame; replaces any frame not yet sent
    pub fn push_frame(&self, sample: FrameSample) {
        self.frames.send_replace(Some(sample));
    }

    async fn stop_pings(&mut self) -> PingStats {
        match self.ping.take() {
            Some(worker) => worker.stop().await,
            None => PingStats::default(),
        }
    }
}

#[derive(Clone)]
pub struct CapturePipeline {
    store: RecordStore,
    gate: BackpressureGate,
    ping: Option<(PingClient, Duration)>,
    auto_upload: Option<(HeavyUploader, String)>,
}

impl CapturePipeline {
    pub fn new(store: RecordStore, gate: BackpressureGate) -> Self {
        Self {
            store,
            gate,
            ping: None,
            auto_upload: None,
        }
    }

    /// Stream frames to the detection endpoint while recording
    pub fn with_fast_ping(mut self, client: PingClient, interval: Duration) -> Self {
        self.ping = Some((client, interval));
        self
    }

    /// Start one background upload for each finished capture
    pub fn with_auto_upload(mut self, uploader: HeavyUploader, officer_id: &str) -> Self {
        self.auto_upload = Some((uploader, officer_id.to_string()));
        self
    }

    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    /// Create the session's DRAFT before any video exists so detections have a
    /// parent to attach to. Refused while the gate is locked.
    pub async fn start_capture(&self, gps: Option<GpsFix>) -> Result<ActiveCapture, CaptureError> {
        self.begin(gps, true).await
    }

    async fn begin(
        &self,
        gps: Option<GpsFix>,
        with_pings: bool,
    ) -> Result<ActiveCapture, CaptureError> {
        let session_id = generate_session_id(SESSION_PREFIX);
        let record = self.gate.admit(&session_id, gps).await?;
        let (frames, frames_rx) = watch::channel(None);

        let ping = match (&self.ping, with_pings) {
            (Some((client, interval)), true) => Some(spawn_ping_worker(
                SessionContext {
                    record_id: record.id.clone(),
                    session_id: record.session_id.clone(),
                },
                self.store.clone(),
                client.clone(),
                *interval,
                frames_rx,
            )),
            _ => None,
        };

        info!("[Capture] {} recording as {}", record.session_id, record.id);
        Ok(ActiveCapture {
            record,
            frames,
            ping,
        })
    }

    /// Stop pings, hash the finished video and store path + hash in one write.
    ///
    /// If the file cannot be hashed the record is left as it was (still
    /// recording, no hash) and the error is returned; the caller may retry
    /// with a good file or call `abort_capture`.
    pub async fn finish_capture(
        &self,
        active: &mut ActiveCapture,
        video_path: &Path,
    ) -> Result<CaptureRecord, CaptureError> {
        let stats = active.stop_pings().await;
        if stats.sent > 0 {
            info!(
                "[Capture] {} pings sent, {} vehicles detected",
                stats.sent, stats.detections_attached
            );
        }

        let hash = match hash_file_async(video_path.to_path_buf()).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("[Capture] {} video unusable: {}", active.session_id(), e);
                return Err(e.into());
            }
        };
        let record = self
            .store
            .finalize_video(active.record_id(), &video_path.to_string_lossy(), &hash)
            .await?;
        info!(
            "[Capture] {} finalized {} ({})",
            record.session_id,
            record.local_video_path,
            hash.short()
        );
        active.record = record.clone();

        if let Some((uploader, officer_id)) = &self.auto_upload {
            let uploader = uploader.clone();
            let officer_id = officer_id.clone();
            let record_id = record.id.clone();
            tokio::spawn(async move {
                match uploader.upload(&record_id, &officer_id).await {
                    Ok(UploadOutcome::Uploaded { .. }) | Ok(UploadOutcome::AlreadyUploaded) => {}
                    Err(e) => warn!("[Capture] Auto upload of {} failed: {}", record_id, e),
                }
            });
        }

        Ok(record)
    }

    /// Recording failed: stop pings and drop the in-progress record with its
    /// detections
    pub async fn abort_capture(&self, mut active: ActiveCapture) -> Result<(), CaptureError> {
        active.stop_pings().await;
        if !active.record.is_recording() {
            warn!("[Capture] {} already finalized, keeping it", active.session_id());
            return Ok(());
        }
        self.store.delete_record(active.record_id()).await?;
        info!("[Capture] {} aborted", active.session_id());
        Ok(())
    }

    /// Register a video recorded elsewhere as a new DRAFT
    pub async fn ingest(
        &self,
        video_path: &Path,
        gps: Option<GpsFix>,
    ) -> Result<CaptureRecord, CaptureError> {
        let mut active = self.begin(gps, false).await?;
        match self.finish_capture(&mut active, video_path).await {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(cleanup) = self.abort_capture(active).await {
                    error!("[Capture] Cleanup after failed ingest failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }
}
