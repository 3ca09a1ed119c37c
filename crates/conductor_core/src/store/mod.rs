//! State store abstraction.
//!
//! The store is the only shared mutable resource of the engine. Callers
//! never write `state` directly; they go through
//! [`TransitionGuard`](crate::TransitionGuard), which uses
//! [`StateStore::conditional_transition`].

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::entity::{EntityKind, EntityRef, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::state::SyncState;

/// Durable record of synchronizable entities.
///
/// Implementations must make `conditional_transition` atomic with respect
/// to every other call on the same entity.
pub trait StateStore: Send + Sync {
    /// Registers a new entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityExists` if an entity with the same reference is stored.
    fn insert(&self, entity: SyncEntity) -> CoreResult<()>;

    /// Looks up an entity by reference.
    fn find_by_id(&self, entity: &EntityRef) -> CoreResult<Option<SyncEntity>>;

    /// Returns all entities of `kind` currently in `state`.
    fn find_by_state(&self, kind: EntityKind, state: SyncState) -> CoreResult<Vec<SyncEntity>>;

    /// Sets `state` to `to` only if the stored state is one of `allowed_from`.
    ///
    /// Returns `Ok(false)` if the entity exists but is in another state.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn conditional_transition(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
    ) -> CoreResult<bool>;

    /// Like [`StateStore::conditional_transition`], and when the transition
    /// applies, also replaces the error message in the same write.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn conditional_transition_with_error(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
        message: &str,
    ) -> CoreResult<bool>;

    /// Replaces the entity's error message (empty string clears it).
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn set_error_message(&self, entity: &EntityRef, message: &str) -> CoreResult<()>;

    /// Resolves a reference token.
    ///
    /// Malformed tokens fail closed: they are reported as `InvalidToken`,
    /// which callers treat exactly like a missing entity.
    fn resolve(&self, token: &str) -> CoreResult<SyncEntity> {
        let reference = EntityRef::parse(token)?;
        self.find_by_id(&reference)?
            .ok_or_else(|| CoreError::not_found(token))
    }
}
