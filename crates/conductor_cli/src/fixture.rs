//! JSON fixtures describing a deployment to synchronize.
//!
//! ```json
//! {
//!   "backends": [{ "service_type": "OpenStack", "sync_error": "timeout" }],
//!   "entities": [{ "id": "…", "kind": "service_settings", "name": "cloud",
//!                  "service_type": "OpenStack", "state": "IN_SYNC" }],
//!   "users": [], "ssh_keys": [], "members": [],
//!   "tasks": [{ "task": "push_ssh_keys", "links": ["service_project_link:…"] }]
//! }
//! ```

use crate::simulated::BackendSpec;
use conductor_core::{
    CoreError, EntityId, MemoryCredentialStore, ProjectId, SshPublicKey, StateStore, SyncEntity,
    User,
};
use conductor_engine::Task;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a fixture.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("failed to read fixture {path}: {source}")]
    Read {
        /// Fixture path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a valid fixture.
    #[error("invalid fixture {path}: {source}")]
    Parse {
        /// Fixture path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// An entity could not be stored.
    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Project membership entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    /// Project the user belongs to.
    pub project: ProjectId,
    /// Member user.
    pub user: EntityId,
}

/// A deployment description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Simulated backend behaviour per service type.
    pub backends: Vec<BackendSpec>,
    /// Entities to register.
    pub entities: Vec<SyncEntity>,
    /// Users in the credential directory.
    pub users: Vec<User>,
    /// SSH keys in the credential directory.
    pub ssh_keys: Vec<SshPublicKey>,
    /// Project memberships.
    pub members: Vec<Membership>,
    /// Tasks submitted before the first sweep.
    pub tasks: Vec<Task>,
}

/// Outcome of seeding stores from a fixture.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Entities inserted.
    pub inserted: usize,
    /// Entities already present in the store.
    pub existing: usize,
}

impl Fixture {
    /// Reads a fixture from `path`.
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let raw = fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| FixtureError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parses a fixture from JSON text.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Service types used by the fixture's entities and backend entries.
    pub fn service_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entities
            .iter()
            .map(|entity| entity.service_type.clone())
            .chain(self.backends.iter().map(|spec| spec.service_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Seeds `store` and `credentials`.
    ///
    /// Entities already present (e.g. in a reopened file store) keep their
    /// stored state.
    pub fn seed(
        &self,
        store: &dyn StateStore,
        credentials: &MemoryCredentialStore,
    ) -> Result<SeedReport, FixtureError> {
        let mut report = SeedReport::default();
        for entity in &self.entities {
            match store.insert(entity.clone()) {
                Ok(()) => report.inserted += 1,
                Err(CoreError::EntityExists { entity }) => {
                    tracing::debug!(entity = %entity, "entity already stored");
                    report.existing += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        for user in &self.users {
            credentials.add_user(user.clone());
        }
        for key in &self.ssh_keys {
            credentials.add_ssh_key(key.clone());
        }
        for member in &self.members {
            credentials.add_member(member.project, member.user);
        }
        Ok(report)
    }
}
