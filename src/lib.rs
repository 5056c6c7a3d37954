//! Offline-first evidence capture with a durable local record store, a
//! best-effort fast ping channel and an authoritative heavy upload channel.

pub mod backpressure;
pub mod capture;
pub mod config;
pub mod constants;
pub mod db;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod lifecycle;
pub mod model;
pub mod ping;
pub mod queries;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod tags;
pub mod upload;

pub use constants::SCHEMA_VERSION;
pub use engine::Engine;
pub use error::{
    CaptureError, ConfigError, EngineError, HashError, ReconcileError, StoreError, UploadError,
};
pub use lifecycle::RecordStatus;
