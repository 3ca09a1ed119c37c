//! Error types for Conductor core.

use crate::state::SyncState;
use crate::transition::Transition;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempted state change is not permitted from the entity's current state.
    #[error("illegal transition {transition} for {entity}: state is {actual}, expected one of {allowed:?}")]
    IllegalTransition {
        /// Reference token of the entity.
        entity: String,
        /// The transition that was attempted.
        transition: Transition,
        /// State observed when the conditional update was rejected.
        actual: SyncState,
        /// States the transition may start from.
        allowed: &'static [SyncState],
    },

    /// Entity not found in the state store.
    #[error("entity not found: {entity}")]
    EntityNotFound {
        /// Reference token of the missing entity.
        entity: String,
    },

    /// Entity already registered.
    #[error("entity already exists: {entity}")]
    EntityExists {
        /// Reference token of the duplicate entity.
        entity: String,
    },

    /// Reference token could not be parsed.
    #[error("invalid reference token {token:?}: {reason}")]
    InvalidToken {
        /// The raw token.
        token: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown state name.
    #[error("unknown synchronization state: {0}")]
    UnknownState(String),

    /// State store is locked by another process.
    #[error("state store locked: another process has exclusive access")]
    StoreLocked,

    /// Snapshot encoding or decoding failed.
    #[error("snapshot codec error: {0}")]
    Codec(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates an entity-not-found error.
    pub fn not_found(entity: impl ToString) -> Self {
        Self::EntityNotFound {
            entity: entity.to_string(),
        }
    }

    /// Creates an invalid-token error.
    pub fn invalid_token(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is an illegal transition.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, CoreError::IllegalTransition { .. })
    }

    /// Returns true if the referenced entity does not exist (or the token was unusable).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::EntityNotFound { .. } | CoreError::InvalidToken { .. }
        )
    }
}
