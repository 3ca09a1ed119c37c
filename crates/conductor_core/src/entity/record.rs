//! Persisted synchronizable entity record.

use crate::entity::{EntityId, EntityKind, EntityRef, ProjectId};
use crate::state::SyncState;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The durable record of one service settings entry or project link.
///
/// Records are plain values: the store hands out copies, and holding one does
/// not lock anything. Fields other than `state` may be set by the owner when
/// registering the entity; `state` is only ever changed by the transition
/// guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntity {
    /// Entity identifier.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Human label, used for diagnostics only.
    pub name: String,
    /// Backend type used to look up the adapter (e.g. `OpenStack`).
    pub service_type: String,
    /// Current synchronization state.
    pub state: SyncState,
    /// Last failure detail; empty when there is none.
    #[serde(default)]
    pub error_message: String,
    /// For links: the settings entry the link is bound to.
    #[serde(default)]
    pub settings: Option<EntityRef>,
    /// For links: the project whose members are propagated to the backend.
    #[serde(default)]
    pub project: Option<ProjectId>,
    /// Milliseconds since the Unix epoch of the last persisted change.
    #[serde(default)]
    pub modified_at: u64,
}

impl SyncEntity {
    /// Creates a service settings record in `NEW`.
    pub fn settings(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            kind: EntityKind::ServiceSettings,
            name: name.into(),
            service_type: service_type.into(),
            state: SyncState::New,
            error_message: String::new(),
            settings: None,
            project: None,
            modified_at: now_millis(),
        }
    }

    /// Creates a project link bound to `settings`, in `NEW`.
    pub fn link(name: impl Into<String>, settings: &SyncEntity, project: ProjectId) -> Self {
        Self {
            id: EntityId::new(),
            kind: EntityKind::ServiceProjectLink,
            name: name.into(),
            service_type: settings.service_type.clone(),
            state: SyncState::New,
            error_message: String::new(),
            settings: Some(settings.reference()),
            project: Some(project),
            modified_at: now_millis(),
        }
    }

    /// Sets the initial state. Only meaningful before the record is stored.
    #[must_use]
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.state = state;
        self
    }

    /// Sets the identifier. Only meaningful before the record is stored.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// Returns the reference of this entity.
    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
    }

    /// Returns the reference token of this entity.
    pub fn token(&self) -> String {
        self.reference().to_token()
    }

    /// Returns true if an error message is recorded.
    pub fn has_error(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_inherits_service_type() {
        let settings = SyncEntity::settings("openstack-main", "OpenStack");
        let project = ProjectId::new();
        let link = SyncEntity::link("alpha", &settings, project);

        assert_eq!(link.kind, EntityKind::ServiceProjectLink);
        assert_eq!(link.service_type, "OpenStack");
        assert_eq!(link.settings, Some(settings.reference()));
        assert_eq!(link.project, Some(project));
        assert_eq!(link.state, SyncState::New);
    }

    #[test]
    fn token_matches_reference() {
        let settings = SyncEntity::settings("zabbix", "Zabbix").with_state(SyncState::InSync);
        assert_eq!(settings.token(), format!("service_settings:{}", settings.id));
        assert!(!settings.has_error());
    }

    #[test]
    fn json_defaults() {
        let id = EntityId::new();
        let json = format!(
            r#"{{"id":"{id}","kind":"service_settings","name":"s","service_type":"OpenStack","state":"IN_SYNC"}}"#
        );
        let entity: SyncEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity.id, id);
        assert_eq!(entity.state, SyncState::InSync);
        assert!(entity.error_message.is_empty());
        assert!(entity.settings.is_none());
    }
}
