//! SSH keys, users and the credential directory.

use crate::entity::{EntityId, ProjectId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An SSH public key owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPublicKey {
    /// Key identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Key fingerprint.
    pub fingerprint: String,
    /// OpenSSH-encoded public key.
    pub public_key: String,
    /// Owner.
    pub user_id: EntityId,
}

/// A control-plane user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: EntityId,
    /// Login name.
    pub username: String,
    /// Full name.
    #[serde(default)]
    pub full_name: String,
}

/// Read access to keys and users referenced by propagation tasks.
pub trait CredentialStore: Send + Sync {
    /// Looks up an SSH key.
    fn ssh_key(&self, id: &EntityId) -> Option<SshPublicKey>;

    /// Looks up a user.
    fn user(&self, id: &EntityId) -> Option<User>;

    /// Returns the SSH keys of every member of `project`.
    fn ssh_keys_for_project(&self, project: &ProjectId) -> Vec<SshPublicKey>;
}

/// An in-memory credential directory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    keys: RwLock<HashMap<EntityId, SshPublicKey>>,
    users: RwLock<HashMap<EntityId, User>>,
    members: RwLock<HashMap<ProjectId, Vec<EntityId>>>,
}

impl MemoryCredentialStore {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    /// Removes a user and returns it.
    pub fn remove_user(&self, id: &EntityId) -> Option<User> {
        self.users.write().remove(id)
    }

    /// Adds or replaces an SSH key.
    pub fn add_ssh_key(&self, key: SshPublicKey) {
        self.keys.write().insert(key.id, key);
    }

    /// Removes an SSH key and returns it.
    pub fn remove_ssh_key(&self, id: &EntityId) -> Option<SshPublicKey> {
        self.keys.write().remove(id)
    }

    /// Grants `user` a role in `project`.
    pub fn add_member(&self, project: ProjectId, user: EntityId) {
        let mut members = self.members.write();
        let entry = members.entry(project).or_default();
        if !entry.contains(&user) {
            entry.push(user);
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn ssh_key(&self, id: &EntityId) -> Option<SshPublicKey> {
        self.keys.read().get(id).cloned()
    }

    fn user(&self, id: &EntityId) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    fn ssh_keys_for_project(&self, project: &ProjectId) -> Vec<SshPublicKey> {
        let members = self.members.read();
        let Some(users) = members.get(project) else {
            return Vec::new();
        };
        let keys = self.keys.read();
        let mut found: Vec<SshPublicKey> = keys
            .values()
            .filter(|key| users.contains(&key.user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}
