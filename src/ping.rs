//! Fast ping channel: lossy, throttled frame samples sent while recording.
//!
//! A ping never fails the caller. Transport and server errors are logged and
//! turned into an empty detection list, and the worker never holds up the
//! producer of frames: the latest frame simply replaces the previous one.

use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::hashing::hash_bytes;
use crate::model::{GpsFix, NewDetection};
use crate::store::{AttachOutcome, RecordStore};
use crate::tags::SystemTag;

/// One frame grabbed from the live camera feed
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub jpeg: Bytes,
    pub gps: Option<GpsFix>,
}

/// One object reported by the detection endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DetectedObject {
    #[serde(alias = "class")]
    pub label: String,
    /// Stable per-vehicle identity assigned by the detector, if any
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub track_id: Option<u64>,
    #[serde(default, alias = "thumbnail_uri")]
    pub thumbnail_url: Option<String>,
}

impl DetectedObject {
    /// Identity used to deduplicate vehicles within one session
    pub fn identifier(&self) -> String {
        if let Some(id) = self.vehicle_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return id.trim().to_string();
        }
        let label = self.label.trim().to_ascii_lowercase();
        match self.track_id {
            Some(track) => format!("{}_{}", label, track),
            None => label,
        }
    }

    /// `None` unless the object is a vehicle
    pub fn to_detection(&self) -> Option<NewDetection> {
        let class = SystemTag::from_detector_label(&self.label)?;
        Some(NewDetection {
            vehicle_identifier: self.identifier(),
            vehicle_class: class,
            thumbnail_uri: self.thumbnail_url.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PingResponse {
    #[serde(default)]
    pub detections: Vec<DetectedObject>,
}

#[derive(Clone)]
pub struct PingClient {
    client: Client,
    endpoint: Url,
}

impl PingClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one sample. Errors are swallowed into an empty response.
    pub async fn ping(&self, sample: &FrameSample) -> PingResponse {
        match self.try_ping(sample).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[Ping] Fast ping failed, continuing: {}", e);
                PingResponse::default()
            }
        }
    }

    async fn try_ping(&self, sample: &FrameSample) -> Result<PingResponse, reqwest::Error> {
        let frame_hash = hash_bytes(&sample.jpeg);
        let image = Part::bytes(sample.jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let mut form = Form::new()
            .part("image", image)
            .text("frame_hash", frame_hash.to_string());
        if let Some(gps) = sample.gps {
            form = form
                .text("gps_lat", gps.lat.to_string())
                .text("gps_lng", gps.lng.to_string());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        response.json::<PingResponse>().await
    }
}

/// Explicit context handed to the worker at session start; the worker never
/// looks up "the current session" anywhere else
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub record_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    pub sent: u64,
    pub empty: u64,
    pub detections_attached: u64,
}

/// Handle to a running ping worker. `stop` must be awaited before the
/// session's record is finalized.
pub struct PingWorker {
    token: CancellationToken,
    handle: JoinHandle<PingStats>,
}

impl PingWorker {
    /// Cancel any in-flight ping and wait for the worker to exit.
    /// Nothing attaches to the session once this returns.
    pub async fn stop(self) -> PingStats {
        self.token.cancel();
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("[Ping] Worker task ended abnormally: {}", e);
                PingStats::default()
            }
        }
    }
}

pub fn spawn_ping_worker(
    ctx: SessionContext,
    store: RecordStore,
    client: PingClient,
    interval: Duration,
    frames: watch::Receiver<Option<FrameSample>>,
) -> PingWorker {
    let token = CancellationToken::new();
    let handle = tokio::spawn(run_ping_loop(ctx, store, client, interval, frames, token.clone()));
    PingWorker { token, handle }
}

async fn run_ping_loop(
    ctx: SessionContext,
    store: RecordStore,
    client: PingClient,
    interval: Duration,
    mut frames: watch::Receiver<Option<FrameSample>>,
    token: CancellationToken,
) -> PingStats {
    let mut stats = PingStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("[Ping] {} started (every {:?})", ctx.session_id, interval);

    'session: loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Only send frames we have not sent yet
        match frames.has_changed() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => break,
        }
        let latest = frames.borrow_and_update().clone();
        let sample = match latest {
            Some(sample) => sample,
            None => continue,
        };

        let response = tokio::select! {
            _ = token.cancelled() => break,
            response = client.ping(&sample) => response,
        };
        stats.sent += 1;
        if response.detections.is_empty() {
            stats.empty += 1;
            continue;
        }

        for object in &response.detections {
            let Some(detection) = object.to_detection() else {
                debug!("[Ping] {} ignoring non-vehicle '{}'", ctx.session_id, object.label);
                continue;
            };
            match store.attach_detection(&ctx.session_id, detection).await {
                Ok(AttachOutcome::Attached(child)) => {
                    stats.detections_attached += 1;
                    info!(
                        "[Ping] {} attached {} ({}) to {}",
                        ctx.session_id, child.vehicle_identifier, child.vehicle_class, ctx.record_id
                    );
                }
                Ok(AttachOutcome::Duplicate) => {}
                Ok(AttachOutcome::SessionClosed) | Ok(AttachOutcome::NoSession) => {
                    debug!("[Ping] {} no longer recording, dropping detections", ctx.session_id);
                    break 'session;
                }
                Err(e) => warn!("[Ping] {} failed to store detection: {}", ctx.session_id, e),
            }
        }
    }

    info!(
        "[Ping] {} stopped: {} sent, {} empty, {} vehicles attached",
        ctx.session_id, stats.sent, stats.empty, stats.detections_attached
    );
    stats
}
