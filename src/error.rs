use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::{IllegalTransition, RecordStatus};

/// Failures reading a capture file for hashing. Any of these makes the
/// capture unusable; the caller must not advance the record.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' is empty")]
    Empty(PathBuf),
    #[error("'{path}' changed while hashing: expected {expected} bytes, read {actual}")]
    Truncated {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("hashing task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("capture record '{0}' not found")]
    RecordNotFound(String),
    #[error("vehicle detection '{0}' not found")]
    DetectionNotFound(String),
    #[error(transparent)]
    Transition(#[from] IllegalTransition),
    #[error("capture record '{id}' is {actual}, expected {expected}")]
    StatusConflict {
        id: String,
        expected: RecordStatus,
        actual: RecordStatus,
    },
    #[error("capture record '{id}' is {status} and can no longer be edited")]
    NotEditable { id: String, status: RecordStatus },
    #[error("capture record '{0}' is not waiting for a finished video")]
    NotRecording(String),
    #[error("capture record '{0}' is still recording")]
    StillRecording(String),
    #[error("capture record '{0}' has no video hash")]
    MissingHash(String),
    #[error("capture record '{0}' no longer carries the hash that was uploaded")]
    HashChanged(String),
    #[error("video '{path}' already belongs to capture record '{owner}'")]
    PathAlreadyOwned { path: String, owner: String },
    #[error("cannot resolve video '{path}': {source}")]
    VideoPath {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt {table} row '{id}': {reason}")]
    Corrupt {
        table: &'static str,
        id: String,
        reason: String,
    },
    #[error("cannot encode tags: {0}")]
    TagEncoding(#[from] serde_json::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(
        "capture locked: {pending} records awaiting upload (ceiling {ceiling}); \
         review and submit drafts first"
    )]
    LockedOut { pending: u64, ceiling: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("captured video unusable: {0}")]
    Hash(#[from] HashError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no network connectivity")]
    Offline,
    #[error("capture record '{0}' not found")]
    RecordNotFound(String),
    #[error("capture record '{id}' is {status}; only DRAFT records can be uploaded")]
    NotUploadable { id: String, status: RecordStatus },
    #[error("capture record '{0}' is still recording")]
    StillRecording(String),
    #[error("capture record '{0}' has no video hash")]
    MissingHash(String),
    #[error("video for capture record '{id}' is missing at '{path}'")]
    VideoMissing { id: String, path: String },
    #[error(
        "video for capture record '{id}' no longer matches its hash \
         (stored {expected}, found {actual})"
    )]
    IntegrityMismatch {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("session '{0}' has detected vehicles but none are tagged")]
    MissingTags(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server rejected upload with status {status}: {body}")]
    Server { status: u16, body: String },
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Connectivity failures are cheap to retry later; everything else needs attention
    pub fn is_connectivity(&self) -> bool {
        match self {
            UploadError::Offline => true,
            UploadError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot scan capture cache '{path}': {source}")]
    CacheScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another process holds the engine lock at '{0}'")]
    Locked(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
