//! In-memory state store.

use super::StateStore;
use crate::entity::{now_millis, EntityKind, EntityRef, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::state::SyncState;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory state store.
///
/// All mutations take the write lock, which makes the conditional update
/// atomic within one process. Entities are kept ordered by reference so
/// sweeps visit them in a stable order.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entities: RwLock<BTreeMap<EntityRef, SyncEntity>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `entities`.
    ///
    /// # Errors
    ///
    /// Returns `EntityExists` on duplicate references.
    pub fn with_entities(entities: impl IntoIterator<Item = SyncEntity>) -> CoreResult<Self> {
        let store = Self::new();
        for entity in entities {
            store.insert(entity)?;
        }
        Ok(store)
    }

    /// Returns a copy of every stored entity.
    pub fn snapshot(&self) -> Vec<SyncEntity> {
        self.entities.read().values().cloned().collect()
    }

    /// Removes an entity, as the owning resource does when it is deleted.
    pub fn remove(&self, entity: &EntityRef) -> Option<SyncEntity> {
        self.entities.write().remove(entity)
    }

    /// Puts `record` back, replacing whatever is stored under its reference.
    pub(crate) fn restore(&self, record: SyncEntity) {
        self.entities.write().insert(record.reference(), record);
    }

    fn transition_record(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
        message: Option<&str>,
    ) -> CoreResult<bool> {
        let mut entities = self.entities.write();
        let record = entities
            .get_mut(entity)
            .ok_or_else(|| CoreError::not_found(entity))?;
        if !allowed_from.contains(&record.state) {
            return Ok(false);
        }
        record.state = to;
        if let Some(message) = message {
            record.error_message = message.to_string();
        }
        record.modified_at = now_millis();
        Ok(true)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn insert(&self, entity: SyncEntity) -> CoreResult<()> {
        let mut entities = self.entities.write();
        let reference = entity.reference();
        if entities.contains_key(&reference) {
            return Err(CoreError::EntityExists {
                entity: reference.to_token(),
            });
        }
        entities.insert(reference, entity);
        Ok(())
    }

    fn find_by_id(&self, entity: &EntityRef) -> CoreResult<Option<SyncEntity>> {
        Ok(self.entities.read().get(entity).cloned())
    }

    fn find_by_state(&self, kind: EntityKind, state: SyncState) -> CoreResult<Vec<SyncEntity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.kind == kind && e.state == state)
            .cloned()
            .collect())
    }

    fn conditional_transition(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
    ) -> CoreResult<bool> {
        self.transition_record(entity, allowed_from, to, None)
    }

    fn conditional_transition_with_error(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
        message: &str,
    ) -> CoreResult<bool> {
        self.transition_record(entity, allowed_from, to, Some(message))
    }

    fn set_error_message(&self, entity: &EntityRef, message: &str) -> CoreResult<()> {
        let mut entities = self.entities.write();
        let record = entities
            .get_mut(entity)
            .ok_or_else(|| CoreError::not_found(entity))?;
        record.error_message = message.to_string();
        record.modified_at = now_millis();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn insert_and_find() {
        let store = MemoryStateStore::new();
        let entity = SyncEntity::settings("a", "OpenStack").with_state(SyncState::InSync);
        let reference = entity.reference();
        store.insert(entity.clone()).unwrap();

        assert_eq!(store.find_by_id(&reference).unwrap(), Some(entity.clone()));
        assert!(matches!(
            store.insert(entity),
            Err(CoreError::EntityExists { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_by_state_filters_kind() {
        let settings = SyncEntity::settings("s", "OpenStack").with_state(SyncState::InSync);
        let link = SyncEntity::link("l", &settings, Default::default()).with_state(SyncState::InSync);
        let erred = SyncEntity::settings("e", "OpenStack").with_state(SyncState::Erred);
        let store = MemoryStateStore::with_entities([settings, link, erred]).unwrap();

        let found = store
            .find_by_state(EntityKind::ServiceSettings, SyncState::InSync)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "s");
    }

    #[test]
    fn conditional_transition_rejects_other_states() {
        let entity = SyncEntity::settings("a", "OpenStack").with_state(SyncState::Erred);
        let reference = entity.reference();
        let store = MemoryStateStore::with_entities([entity]).unwrap();

        assert!(!store
            .conditional_transition(&reference, &[SyncState::InSync], SyncState::SyncingScheduled)
            .unwrap());
        assert!(store
            .conditional_transition(&reference, &[SyncState::Erred], SyncState::InSync)
            .unwrap());
        assert_eq!(
            store.find_by_id(&reference).unwrap().unwrap().state,
            SyncState::InSync
        );
    }

    #[test]
    fn concurrent_transition_has_one_winner() {
        let entity = SyncEntity::settings("a", "OpenStack").with_state(SyncState::InSync);
        let reference = entity.reference();
        let store = Arc::new(MemoryStateStore::with_entities([entity]).unwrap());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if store
                        .conditional_transition(
                            &reference,
                            &[SyncState::InSync],
                            SyncState::SyncingScheduled,
                        )
                        .unwrap()
                    {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_fails_closed() {
        let store = MemoryStateStore::new();
        assert!(store.resolve("garbage").unwrap_err().is_not_found());
        let missing = SyncEntity::settings("m", "OpenStack").token();
        assert!(store.resolve(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn transition_with_error_writes_both_or_neither() {
        let entity = SyncEntity::settings("a", "OpenStack").with_state(SyncState::Syncing);
        let reference = entity.reference();
        let store = MemoryStateStore::with_entities([entity]).unwrap();

        assert!(!store
            .conditional_transition_with_error(
                &reference,
                &[SyncState::InSync],
                SyncState::Erred,
                "ignored",
            )
            .unwrap());
        let stored = store.find_by_id(&reference).unwrap().unwrap();
        assert_eq!(stored.state, SyncState::Syncing);
        assert_eq!(stored.error_message, "");

        assert!(store
            .conditional_transition_with_error(
                &reference,
                &[SyncState::Syncing],
                SyncState::Erred,
                "timeout",
            )
            .unwrap());
        let stored = store.find_by_id(&reference).unwrap().unwrap();
        assert_eq!(stored.state, SyncState::Erred);
        assert_eq!(stored.error_message, "timeout");
    }
}
