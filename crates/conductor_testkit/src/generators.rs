//! Property-based test generators using proptest.

use conductor_core::{EntityId, EntityKind, EntityRef, SyncEntity, SyncState, Transition};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(|bytes| EntityId::from_uuid(Uuid::from_bytes(bytes)))
}

/// Strategy for generating sync states.
pub fn sync_state_strategy() -> impl Strategy<Value = SyncState> {
    prop::sample::select(SyncState::ALL.to_vec())
}

/// Strategy for generating named transitions.
pub fn transition_strategy() -> impl Strategy<Value = Transition> {
    prop::sample::select(Transition::ALL.to_vec())
}

/// Strategy for generating entity kinds.
pub fn entity_kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::ServiceSettings),
        Just(EntityKind::ServiceProjectLink)
    ]
}

/// Strategy for generating well-formed reference tokens.
pub fn token_strategy() -> impl Strategy<Value = String> {
    (entity_kind_strategy(), entity_id_strategy())
        .prop_map(|(kind, id)| EntityRef::new(kind, id).to_token())
}

/// Strategy for generating tokens that must not resolve: wrong separator,
/// unknown kind, or an id that is not a UUID.
pub fn malformed_token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_]{0,24}",
        ("[a-z]{1,12}", entity_id_strategy())
            .prop_filter("kind must be unknown", |(kind, _)| {
                kind.parse::<EntityKind>().is_err()
            })
            .prop_map(|(kind, id)| format!("{kind}:{id}")),
        (entity_kind_strategy(), "[g-z]{1,31}").prop_map(|(kind, id)| format!("{kind}:{id}")),
    ]
}

/// Strategy for generating settings entries in an arbitrary state.
pub fn settings_strategy() -> impl Strategy<Value = SyncEntity> {
    (entity_id_strategy(), "[a-z][a-z0-9-]{0,15}", sync_state_strategy()).prop_map(
        |(id, name, state)| {
            SyncEntity::settings(name, "OpenStack")
                .with_id(id)
                .with_state(state)
        },
    )
}

/// Test configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
