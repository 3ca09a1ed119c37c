//! Error types for the engine.

use conductor_core::{BackendError, CoreError, SyncState};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while executing units of work.
#[derive(Error, Debug)]
pub enum EngineError {
    /// State store or transition error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Backend adapter error. Displays as the adapter's own message, which
    /// is what gets persisted as the entity's error text.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A named throttle has no free slot.
    #[error("throttle {key} is at capacity ({max})")]
    Throttled {
        /// Throttle key.
        key: String,
        /// Maximum concurrent holders.
        max: usize,
    },

    /// A stage found the entity in a state other than the one it expects.
    #[error("{entity} is in state {actual}, expected {expected}")]
    UnexpectedState {
        /// Reference token of the entity.
        entity: String,
        /// Expected state.
        expected: SyncState,
        /// Observed state.
        actual: SyncState,
    },

    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    SchedulerClosed,

    /// The scheduler could not attach to an async runtime.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Waiting for the scheduler timed out.
    #[error("operation timed out")]
    Timeout,
}

impl EngineError {
    /// Returns true if the error is an illegal transition.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, EngineError::Core(e) if e.is_illegal_transition())
    }

    /// Returns true if the referenced entity no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Core(e) if e.is_not_found())
    }

    /// Returns true if the backend declined the operation as inapplicable.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, EngineError::Backend(e) if e.is_not_implemented())
    }
}
