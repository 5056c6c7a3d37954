//! Capture record lifecycle.
//!
//! ```text
//!            begin upload             server ack for video_hash
//!   DRAFT ───────────────────▶ SYNCING ─────────────────────────▶ UPLOADED
//!     ▲                           │
//!     └───────────────────────────┘
//!       upload failure / startup recovery
//! ```
//!
//! `UPLOADED` is terminal. There is no direct `DRAFT -> UPLOADED` edge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    /// Captured locally, editable, eligible for upload
    Draft,
    /// Upload in flight; a second upload of the same record is rejected
    Syncing,
    /// Accepted by the server; immutable
    Uploaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: RecordStatus,
    pub to: RecordStatus,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 3] = [
        RecordStatus::Draft,
        RecordStatus::Syncing,
        RecordStatus::Uploaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "DRAFT",
            RecordStatus::Syncing => "SYNCING",
            RecordStatus::Uploaded => "UPLOADED",
        }
    }

    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Draft, RecordStatus::Syncing)
                | (RecordStatus::Syncing, RecordStatus::Uploaded)
                | (RecordStatus::Syncing, RecordStatus::Draft)
        )
    }

    pub fn transition(self, next: RecordStatus) -> Result<RecordStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Not yet durably accepted by the server; counted by the backpressure gate
    pub fn is_pending(self) -> bool {
        matches!(self, RecordStatus::Draft | RecordStatus::Syncing)
    }

    /// Tags and other officer input may only change while in draft
    pub fn is_editable(self) -> bool {
        self == RecordStatus::Draft
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(RecordStatus::Draft),
            "SYNCING" => Ok(RecordStatus::Syncing),
            "UPLOADED" => Ok(RecordStatus::Uploaded),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}
