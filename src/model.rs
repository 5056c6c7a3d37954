use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::RECORDING_SENTINEL;
use crate::hashing::ContentHash;
use crate::lifecycle::RecordStatus;
use crate::tags::{SystemTag, ViolationTag};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
}

/// One physical recording attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub id: String,
    pub session_id: String,
    pub status: RecordStatus,
    /// Evidence file, or `RECORDING_SENTINEL` while recording is in progress
    pub local_video_path: String,
    pub video_hash: Option<ContentHash>,
    pub gps: Option<GpsFix>,
    pub manual_tags: BTreeSet<ViolationTag>,
    pub system_tags: BTreeSet<SystemTag>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl CaptureRecord {
    pub fn is_recording(&self) -> bool {
        self.local_video_path == RECORDING_SENTINEL
    }

    pub fn is_recovered(&self) -> bool {
        self.system_tags.contains(&SystemTag::Recovered)
    }
}

/// One vehicle surfaced by a fast ping during an active session.
/// Holds a back-reference to its parent record; deleting the parent cascades.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleDetection {
    pub id: String,
    pub capture_record_id: String,
    /// Detector-assigned identity, unique within the parent record
    pub vehicle_identifier: String,
    pub vehicle_class: SystemTag,
    pub thumbnail_uri: Option<String>,
    pub manual_tags: BTreeSet<ViolationTag>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// A detector hit that passed the vehicle filter, ready to attach to a session
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub vehicle_identifier: String,
    pub vehicle_class: SystemTag,
    pub thumbnail_uri: Option<String>,
}

/// Everything the heavy upload channel transmits for one record
#[derive(Debug, Clone)]
pub struct UploadManifest {
    pub record: CaptureRecord,
    pub video_hash: ContentHash,
    /// Union of the record's tags and every child vehicle's tags
    pub manual_tags: BTreeSet<ViolationTag>,
}
