//! Entity kinds and reference tokens.
//!
//! A reference token (`"<kind>:<id>"`) is the only form in which an entity
//! crosses a task boundary. The receiving task re-fetches the entity from the
//! state store, so it always acts on fresh state.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of synchronizable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Credentials and endpoint of one backend account.
    ServiceSettings,
    /// Binding of a project to a service.
    ServiceProjectLink,
}

impl EntityKind {
    /// Model name used in reference tokens.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ServiceSettings => "service_settings",
            EntityKind::ServiceProjectLink => "service_project_link",
        }
    }

    /// Human-readable name used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::ServiceSettings => "service settings",
            EntityKind::ServiceProjectLink => "service project link",
        }
    }

    /// Returns true if entities of this kind can go through backend creation.
    pub fn supports_creation(&self) -> bool {
        matches!(self, EntityKind::ServiceSettings)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_settings" => Ok(EntityKind::ServiceSettings),
            "service_project_link" => Ok(EntityKind::ServiceProjectLink),
            other => Err(CoreError::invalid_token(
                s,
                format!("unknown entity kind {other:?}"),
            )),
        }
    }
}

/// Typed `(kind, id)` pair identifying one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity identifier.
    pub id: EntityId,
}

impl EntityRef {
    /// Creates a reference.
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    /// Parses a `"<kind>:<id>"` token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for a missing separator, an unknown kind or an
    /// unparseable id.
    pub fn parse(token: &str) -> CoreResult<Self> {
        let (kind, id) = token
            .split_once(':')
            .ok_or_else(|| CoreError::invalid_token(token, "missing ':' separator"))?;
        let kind = kind
            .parse::<EntityKind>()
            .map_err(|_| CoreError::invalid_token(token, format!("unknown entity kind {kind:?}")))?;
        let id = id
            .parse::<EntityId>()
            .map_err(|e| CoreError::invalid_token(token, e.to_string()))?;
        Ok(Self { kind, id })
    }

    /// Renders the reference as a token.
    pub fn to_token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EntityRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::parse(&token).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format() {
        let id = EntityId::new();
        let reference = EntityRef::new(EntityKind::ServiceProjectLink, id);
        assert_eq!(reference.to_token(), format!("service_project_link:{id}"));
        assert_eq!(EntityRef::parse(&reference.to_token()).unwrap(), reference);
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let id = EntityId::new();
        for token in [
            String::new(),
            "service_settings".to_string(),
            format!("instance:{id}"),
            "service_settings:not-a-uuid".to_string(),
            format!(":{id}"),
        ] {
            let err = EntityRef::parse(&token).unwrap_err();
            assert!(err.is_not_found(), "token {token:?} gave {err}");
        }
    }

    #[test]
    fn labels_are_readable() {
        assert_eq!(EntityKind::ServiceSettings.label(), "service settings");
        assert_eq!(EntityKind::ServiceProjectLink.label(), "service project link");
    }

    #[test]
    fn creation_support() {
        assert!(EntityKind::ServiceSettings.supports_creation());
        assert!(!EntityKind::ServiceProjectLink.supports_creation());
    }
}
