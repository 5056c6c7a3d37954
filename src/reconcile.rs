//! Startup repair of state left inconsistent by a crash.
//!
//! Runs once, before anything else touches the store, in this order:
//! zombie cleanup, stuck-sync rollback, orphan adoption. The backpressure
//! gate is re-evaluated afterwards.

use log::{info, warn};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::backpressure::{BackpressureGate, GateStatus};
use crate::constants::{generate_session_id, RECOVERED_PREFIX};
use crate::error::{ReconcileError, StoreError};
use crate::hashing::hash_file_async;
use crate::store::RecordStore;
use crate::tags::SystemTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records deleted because recording never finished
    pub zombies_removed: Vec<String>,
    /// SYNCING records returned to DRAFT
    pub rolled_back: u64,
    /// (record id, file path) for every adopted orphan
    pub adopted: Vec<(String, PathBuf)>,
    /// Orphans that could not be hashed; left on disk for the next run
    pub skipped_orphans: Vec<PathBuf>,
    pub gate: GateStatus,
}

pub struct RecoveryReconciler {
    store: RecordStore,
    cache_dir: PathBuf,
    video_extension: String,
}

impl RecoveryReconciler {
    /// `video_extension` is matched case-insensitively, without the dot
    pub fn new(store: RecordStore, cache_dir: PathBuf, video_extension: &str) -> Self {
        Self {
            store,
            cache_dir,
            video_extension: video_extension.trim_start_matches('.').to_string(),
        }
    }

    pub async fn run(&self, gate: &BackpressureGate) -> Result<ReconcileReport, ReconcileError> {
        let zombies_removed = self.remove_zombies().await?;
        let rolled_back = self.store.recover_stuck_uploads().await?;
        if rolled_back > 0 {
            info!("[Reconcile] Rolled back {} interrupted uploads to DRAFT", rolled_back);
        }
        let (adopted, skipped_orphans) = self.adopt_orphans().await?;
        let gate = gate.status().await?;

        info!(
            "[Reconcile] Done: {} zombies removed, {} rolled back, {} orphans adopted, \
             {} skipped; {}/{} pending",
            zombies_removed.len(),
            rolled_back,
            adopted.len(),
            skipped_orphans.len(),
            gate.pending,
            gate.ceiling
        );

        Ok(ReconcileReport {
            zombies_removed,
            rolled_back,
            adopted,
            skipped_orphans,
            gate,
        })
    }

    async fn remove_zombies(&self) -> Result<Vec<String>, StoreError> {
        let ids = self.store.still_recording_ids().await?;
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.store.delete_record(&id).await? {
                info!("[Reconcile] Removed zombie record {}", id);
                removed.push(id);
            }
        }
        Ok(removed)
    }

    async fn adopt_orphans(
        &self,
    ) -> Result<(Vec<(String, PathBuf)>, Vec<PathBuf>), ReconcileError> {
        let candidates = self.scan_cache()?;
        if candidates.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut known: HashSet<PathBuf> = HashSet::new();
        for path in self.store.video_paths().await? {
            let path = PathBuf::from(path);
            if let Ok(canonical) = path.canonicalize() {
                known.insert(canonical);
            }
            known.insert(path);
        }

        let mut adopted = Vec::new();
        let mut skipped = Vec::new();
        for file in candidates {
            let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
            if known.contains(&file) || known.contains(&canonical) {
                continue;
            }

            let hash = match hash_file_async(canonical.clone()).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(
                        "[Reconcile] Leaving unreadable orphan {} in place: {}",
                        file.display(),
                        e
                    );
                    skipped.push(file);
                    continue;
                }
            };

            let session_id = generate_session_id(RECOVERED_PREFIX);
            let tags: BTreeSet<SystemTag> = [SystemTag::Recovered].into_iter().collect();
            let record = self
                .store
                .adopt_video(&session_id, &canonical.to_string_lossy(), hash, tags)
                .await?;
            info!(
                "[Reconcile] Adopted orphan {} as {} ({})",
                canonical.display(),
                record.id,
                session_id
            );
            known.insert(canonical.clone());
            adopted.push((record.id, canonical));
        }
        Ok((adopted, skipped))
    }

    /// Video files directly inside the cache directory. A missing directory
    /// simply has no orphans.
    fn scan_cache(&self) -> Result<Vec<PathBuf>, ReconcileError> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ReconcileError::CacheScan {
                    path: self.cache_dir.clone(),
                    source,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ReconcileError::CacheScan {
                path: self.cache_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && self.has_video_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn has_video_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.video_extension))
            .unwrap_or(false)
    }
}
