use fs2::FileExt;
use log::info;
use std::fs::File;
use std::path::PathBuf;

use crate::backpressure::BackpressureGate;
use crate::capture::CapturePipeline;
use crate::config::EngineConfig;
use crate::db::DATABASE_FILE_NAME;
use crate::error::EngineError;
use crate::ping::PingClient;
use crate::reconcile::{ReconcileReport, RecoveryReconciler};
use crate::store::RecordStore;
use crate::upload::{Connectivity, HeavyUploader};

pub const LOCK_FILE_NAME: &str = "engine.lock";

/// A reconciled store plus the components bound to it.
///
/// `open` is the only constructor: recovery runs to completion while the
/// process holds the engine lock, before any capture or upload can start.
pub struct Engine {
    config: EngineConfig,
    store: RecordStore,
    gate: BackpressureGate,
    capture: CapturePipeline,
    uploader: HeavyUploader,
    startup_report: ReconcileReport,
    // Held for the engine's lifetime; released on drop
    _lock_file: File,
}

impl Engine {
    pub async fn open(
        config: EngineConfig,
        connectivity: Connectivity,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        for dir in [&config.data_dir, &config.cache_dir] {
            std::fs::create_dir_all(dir).map_err(|source| EngineError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let lock_path = config.data_dir.join(LOCK_FILE_NAME);
        let lock_file = File::create(&lock_path).map_err(|source| EngineError::Io {
            path: lock_path.clone(),
            source,
        })?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::Locked(lock_path.clone()))?;

        let store = RecordStore::open(&config.data_dir.join(DATABASE_FILE_NAME)).await?;
        store.record_officer_session(&config.officer_id).await?;

        let gate = BackpressureGate::new(store.clone(), config.draft_ceiling);
        let reconciler = RecoveryReconciler::new(
            store.clone(),
            config.cache_dir.clone(),
            &config.normalized_extension(),
        );
        let startup_report = reconciler.run(&gate).await?;

        let uploader = HeavyUploader::new(
            store.clone(),
            config.upload_endpoint()?,
            config.upload_timeout(),
            connectivity,
        )?;

        let mut capture = CapturePipeline::new(store.clone(), gate.clone());
        if config.fast_ping {
            let client = PingClient::new(config.ping_endpoint()?, config.ping_timeout())?;
            capture = capture.with_fast_ping(client, config.ping_interval());
        }
        if config.auto_upload {
            capture = capture.with_auto_upload(uploader.clone(), &config.officer_id);
        }

        info!(
            "Engine ready for officer {} ({}/{} pending)",
            config.officer_id, startup_report.gate.pending, startup_report.gate.ceiling
        );

        Ok(Self {
            config,
            store,
            gate,
            capture,
            uploader,
            startup_report,
            _lock_file: lock_file,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    pub fn capture(&self) -> &CapturePipeline {
        &self.capture
    }

    pub fn uploader(&self) -> &HeavyUploader {
        &self.uploader
    }

    /// What recovery repaired while opening
    pub fn startup_report(&self) -> &ReconcileReport {
        &self.startup_report
    }

    pub fn lock_path(&self) -> PathBuf {
        self.config.data_dir.join(LOCK_FILE_NAME)
    }
}
