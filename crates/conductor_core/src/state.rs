//! Synchronization states.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synchronization state of a settings record or project link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Registered locally, nothing requested from the backend yet.
    New,
    /// Creation requested; waiting for the next sweep.
    CreationScheduled,
    /// Creation task running against the backend.
    Creating,
    /// Sync requested; a task has been (or is about to be) submitted.
    SyncingScheduled,
    /// Sync task running against the backend.
    Syncing,
    /// Local and remote state agree.
    InSync,
    /// Last backend operation failed; see the entity's error message.
    Erred,
}

impl SyncState {
    /// All states, in lifecycle order.
    pub const ALL: [SyncState; 7] = [
        SyncState::New,
        SyncState::CreationScheduled,
        SyncState::Creating,
        SyncState::SyncingScheduled,
        SyncState::Syncing,
        SyncState::InSync,
        SyncState::Erred,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::New => "NEW",
            SyncState::CreationScheduled => "CREATION_SCHEDULED",
            SyncState::Creating => "CREATING",
            SyncState::SyncingScheduled => "SYNCING_SCHEDULED",
            SyncState::Syncing => "SYNCING",
            SyncState::InSync => "IN_SYNC",
            SyncState::Erred => "ERRED",
        }
    }

    /// Returns true if a backend task is queued or running for the entity.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SyncState::CreationScheduled
                | SyncState::Creating
                | SyncState::SyncingScheduled
                | SyncState::Syncing
        )
    }

    /// Returns true if dependent operations may act on the entity right now.
    pub fn is_ready(&self) -> bool {
        *self == SyncState::InSync
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownState(s.to_string()))
    }
}
