//! Transition table and guard.
//!
//! Every state change goes through [`TransitionGuard::apply`], which performs
//! a conditional update against the state store: the new state is written
//! only if the stored state is still one of the transition's allowed source
//! states. Two workers racing on the same entity therefore cannot both win.

use crate::entity::{EntityRef, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::state::SyncState;
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A named edge of the synchronization state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `NEW → CREATION_SCHEDULED`
    ScheduleCreating,
    /// `CREATION_SCHEDULED → CREATING`
    BeginCreating,
    /// `IN_SYNC | ERRED → SYNCING_SCHEDULED`
    ScheduleSyncing,
    /// `IN_SYNC | SYNCING_SCHEDULED → SYNCING`
    BeginSyncing,
    /// `SYNCING | CREATING → IN_SYNC`
    SetInSync,
    /// any scheduled, active or erred state `→ ERRED`
    SetErred,
    /// `ERRED → IN_SYNC`
    SetInSyncFromErred,
}

impl Transition {
    /// All transitions.
    pub const ALL: [Transition; 7] = [
        Transition::ScheduleCreating,
        Transition::BeginCreating,
        Transition::ScheduleSyncing,
        Transition::BeginSyncing,
        Transition::SetInSync,
        Transition::SetErred,
        Transition::SetInSyncFromErred,
    ];

    /// States this transition may start from.
    pub fn allowed_from(&self) -> &'static [SyncState] {
        match self {
            Transition::ScheduleCreating => &[SyncState::New],
            Transition::BeginCreating => &[SyncState::CreationScheduled],
            Transition::ScheduleSyncing => &[SyncState::InSync, SyncState::Erred],
            Transition::BeginSyncing => &[SyncState::InSync, SyncState::SyncingScheduled],
            Transition::SetInSync => &[SyncState::Syncing, SyncState::Creating],
            Transition::SetErred => &[
                SyncState::CreationScheduled,
                SyncState::Creating,
                SyncState::SyncingScheduled,
                SyncState::Syncing,
                SyncState::Erred,
            ],
            Transition::SetInSyncFromErred => &[SyncState::Erred],
        }
    }

    /// State this transition ends in.
    pub fn target(&self) -> SyncState {
        match self {
            Transition::ScheduleCreating => SyncState::CreationScheduled,
            Transition::BeginCreating => SyncState::Creating,
            Transition::ScheduleSyncing => SyncState::SyncingScheduled,
            Transition::BeginSyncing => SyncState::Syncing,
            Transition::SetInSync | Transition::SetInSyncFromErred => SyncState::InSync,
            Transition::SetErred => SyncState::Erred,
        }
    }

    /// Returns true if the transition may start from `state`.
    pub fn permits(&self, state: SyncState) -> bool {
        self.allowed_from().contains(&state)
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::ScheduleCreating => "schedule_creating",
            Transition::BeginCreating => "begin_creating",
            Transition::ScheduleSyncing => "schedule_syncing",
            Transition::BeginSyncing => "begin_syncing",
            Transition::SetInSync => "set_in_sync",
            Transition::SetErred => "set_erred",
            Transition::SetInSyncFromErred => "set_in_sync_from_erred",
        }
    }

    /// Returns true if `from → to` is an edge of the state machine.
    pub fn is_edge(from: SyncState, to: SyncState) -> bool {
        Transition::ALL
            .iter()
            .any(|t| t.target() == to && t.permits(from))
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates and atomically applies transitions.
#[derive(Clone)]
pub struct TransitionGuard {
    store: Arc<dyn StateStore>,
}

impl TransitionGuard {
    /// Creates a guard over the given store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Applies `transition` to the referenced entity.
    ///
    /// Returns the refreshed entity on success.
    ///
    /// # Errors
    ///
    /// - `IllegalTransition` if the stored state is not an allowed source
    ///   state; the stored state is left unchanged.
    /// - `EntityNotFound` if the entity does not exist.
    pub fn apply(&self, entity: &EntityRef, transition: Transition) -> CoreResult<SyncEntity> {
        self.transition(entity, transition, None)
    }

    /// Applies `transition` and records `message` as the entity's error text
    /// in the same store write.
    ///
    /// # Errors
    ///
    /// See [`TransitionGuard::apply`].
    pub fn apply_with_error(
        &self,
        entity: &EntityRef,
        transition: Transition,
        message: &str,
    ) -> CoreResult<SyncEntity> {
        self.transition(entity, transition, Some(message))
    }

    fn transition(
        &self,
        entity: &EntityRef,
        transition: Transition,
        message: Option<&str>,
    ) -> CoreResult<SyncEntity> {
        let to = transition.target();
        let allowed = transition.allowed_from();
        let applied = match message {
            Some(message) => self
                .store
                .conditional_transition_with_error(entity, allowed, to, message)?,
            None => self.store.conditional_transition(entity, allowed, to)?,
        };
        if applied {
            tracing::debug!(entity = %entity, transition = %transition, state = %to, "transition applied");
            return self
                .store
                .find_by_id(entity)?
                .ok_or_else(|| CoreError::not_found(entity));
        }

        match self.store.find_by_id(entity)? {
            Some(current) => Err(CoreError::IllegalTransition {
                entity: entity.to_token(),
                transition,
                actual: current.state,
                allowed,
            }),
            None => Err(CoreError::not_found(entity)),
        }
    }
}

impl fmt::Debug for TransitionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use proptest::prelude::*;

    fn guard_with(state: SyncState) -> (TransitionGuard, EntityRef) {
        let store = Arc::new(MemoryStateStore::new());
        let entity = SyncEntity::settings("openstack", "OpenStack").with_state(state);
        let reference = entity.reference();
        store.insert(entity).unwrap();
        (TransitionGuard::new(store), reference)
    }

    #[test]
    fn table_targets() {
        assert_eq!(Transition::BeginSyncing.target(), SyncState::Syncing);
        assert!(Transition::BeginSyncing.permits(SyncState::InSync));
        assert!(Transition::BeginSyncing.permits(SyncState::SyncingScheduled));
        assert!(!Transition::BeginSyncing.permits(SyncState::Erred));
        assert!(Transition::ScheduleSyncing.permits(SyncState::Erred));
        assert!(!Transition::SetErred.permits(SyncState::InSync));
    }

    #[test]
    fn apply_returns_refreshed_entity() {
        let (guard, reference) = guard_with(SyncState::InSync);
        let entity = guard.apply(&reference, Transition::ScheduleSyncing).unwrap();
        assert_eq!(entity.state, SyncState::SyncingScheduled);
        let entity = guard.apply(&reference, Transition::BeginSyncing).unwrap();
        assert_eq!(entity.state, SyncState::Syncing);
    }

    #[test]
    fn illegal_transition_leaves_state() {
        let (guard, reference) = guard_with(SyncState::Erred);
        let err = guard.apply(&reference, Transition::BeginSyncing).unwrap_err();
        match err {
            CoreError::IllegalTransition {
                actual, transition, ..
            } => {
                assert_eq!(actual, SyncState::Erred);
                assert_eq!(transition, Transition::BeginSyncing);
            }
            other => panic!("unexpected error: {other}"),
        }
        let stored = guard.store().find_by_id(&reference).unwrap().unwrap();
        assert_eq!(stored.state, SyncState::Erred);
    }

    #[test]
    fn missing_entity_is_not_found() {
        let (guard, _) = guard_with(SyncState::InSync);
        let ghost = SyncEntity::settings("ghost", "OpenStack").reference();
        let err = guard.apply(&ghost, Transition::BeginSyncing).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn apply_with_error_records_message() {
        let (guard, reference) = guard_with(SyncState::Syncing);
        let entity = guard
            .apply_with_error(&reference, Transition::SetErred, "timeout")
            .unwrap();
        assert_eq!(entity.state, SyncState::Erred);
        assert_eq!(entity.error_message, "timeout");
    }

    #[test]
    fn error_text_never_lags_erred_state() {
        let (guard, reference) = guard_with(SyncState::Syncing);
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let store = Arc::clone(guard.store());
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    let entity = store.find_by_id(&reference).unwrap().unwrap();
                    assert_eq!(
                        entity.state == SyncState::Erred,
                        !entity.error_message.is_empty(),
                        "observed {} with message {:?}",
                        entity.state,
                        entity.error_message
                    );
                }
            })
        };

        for _ in 0..500 {
            guard
                .apply_with_error(&reference, Transition::SetErred, "timeout")
                .unwrap();
            guard
                .apply_with_error(&reference, Transition::ScheduleSyncing, "")
                .unwrap();
            guard.apply(&reference, Transition::BeginSyncing).unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        reader.join().unwrap();
    }

    fn state_strategy() -> impl Strategy<Value = SyncState> {
        prop::sample::select(SyncState::ALL.to_vec())
    }

    fn transition_strategy() -> impl Strategy<Value = Transition> {
        prop::sample::select(Transition::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn state_moves_only_along_table(
            start in state_strategy(),
            steps in prop::collection::vec(transition_strategy(), 1..24),
        ) {
            let (guard, reference) = guard_with(start);
            let mut current = start;
            for transition in steps {
                match guard.apply(&reference, transition) {
                    Ok(entity) => {
                        prop_assert!(transition.permits(current));
                        prop_assert!(Transition::is_edge(current, entity.state));
                        current = entity.state;
                    }
                    Err(err) => {
                        prop_assert!(err.is_illegal_transition());
                        prop_assert!(!transition.permits(current));
                        let stored = guard.store().find_by_id(&reference).unwrap().unwrap();
                        prop_assert_eq!(stored.state, current);
                    }
                }
            }
        }
    }
}
