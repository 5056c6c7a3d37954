use log::warn;
use tokio::sync::watch;

use crate::error::{CaptureError, StoreError};
use crate::model::{CaptureRecord, GpsFix};
use crate::store::{AdmitOutcome, RecordStore};

/// Snapshot of the gate computed from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    /// DRAFT + SYNCING records
    pub pending: u64,
    pub ceiling: u64,
}

impl GateStatus {
    pub fn is_locked(&self) -> bool {
        self.pending >= self.ceiling
    }

    /// Captures that may still start before the gate locks
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.pending)
    }
}

/// Blocks new captures once too many records are waiting for upload.
///
/// Holds no count of its own: every query goes back to the store, so the gate
/// cannot drift from ground truth after a crash or an out-of-band write.
/// Uploads are never gated.
#[derive(Clone)]
pub struct BackpressureGate {
    store: RecordStore,
    ceiling: u64,
}

impl BackpressureGate {
    pub fn new(store: RecordStore, ceiling: u64) -> Self {
        Self { store, ceiling }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub async fn status(&self) -> Result<GateStatus, StoreError> {
        let pending = self.store.count_pending().await?;
        Ok(GateStatus {
            pending,
            ceiling: self.ceiling,
        })
    }

    pub async fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.status().await?.is_locked())
    }

    /// Refuse to start a capture while locked. Advisory only: use `admit`
    /// to actually create the record.
    pub async fn ensure_capture_allowed(&self) -> Result<GateStatus, CaptureError> {
        let status = self.status().await?;
        if status.is_locked() {
            return Err(self.locked_out(status.pending));
        }
        Ok(status)
    }

    /// Create the recording's DRAFT if the gate is open. Checking and
    /// inserting is one step, so concurrent starts never exceed the ceiling.
    pub async fn admit(
        &self,
        session_id: &str,
        gps: Option<GpsFix>,
    ) -> Result<CaptureRecord, CaptureError> {
        match self
            .store
            .create_recording_below(self.ceiling, session_id, gps)
            .await?
        {
            AdmitOutcome::Created(record) => Ok(record),
            AdmitOutcome::AtCeiling { pending } => Err(self.locked_out(pending)),
        }
    }

    fn locked_out(&self, pending: u64) -> CaptureError {
        warn!(
            "[Capture] Refusing new capture: {} records pending (ceiling {})",
            pending, self.ceiling
        );
        CaptureError::LockedOut {
            pending,
            ceiling: self.ceiling,
        }
    }

    /// Fires after every store mutation; call `status` again to re-evaluate
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }
}
