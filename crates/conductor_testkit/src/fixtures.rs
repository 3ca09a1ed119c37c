//! Test fixtures.
//!
//! [`Harness`] wires an orchestrator to an in-memory store, an in-memory
//! credential directory, one [`ScriptedBackend`] and a [`LocalQueue`], and
//! offers helpers to seed entities and credentials.

use crate::backend::ScriptedBackend;
use conductor_core::{
    BackendRegistry, EntityId, FileStateStore, MemoryCredentialStore, MemoryStateStore,
    SshPublicKey, StateStore, SyncEntity, SyncState, User,
};
use conductor_engine::{EngineConfig, Job, LocalQueue, Orchestrator, RunStats, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Service type every harness entity uses.
pub const SERVICE_TYPE: &str = "OpenStack";

/// An orchestrator wired to in-memory collaborators.
pub struct Harness {
    /// State store.
    pub store: Arc<MemoryStateStore>,
    /// Credential directory.
    pub credentials: Arc<MemoryCredentialStore>,
    /// Backend adapter for [`SERVICE_TYPE`].
    pub backend: Arc<ScriptedBackend>,
    /// Orchestrator under test.
    pub orchestrator: Orchestrator,
    /// Deterministic queue.
    pub queue: LocalQueue,
}

impl Harness {
    /// Creates a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a harness with `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_backend(config, ScriptedBackend::new())
    }

    /// Creates a harness with `config` and a pre-scripted backend.
    pub fn with_backend(config: EngineConfig, backend: ScriptedBackend) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let backend = Arc::new(backend);
        let registry = BackendRegistry::builder()
            .register_shared(SERVICE_TYPE, backend.clone())
            .build();
        let orchestrator =
            Orchestrator::new(store.clone(), registry, credentials.clone()).with_config(config);
        Self {
            store,
            credentials,
            backend,
            orchestrator,
            queue: LocalQueue::new(),
        }
    }

    /// Inserts a settings entry in `state`.
    pub fn settings(&self, name: &str, state: SyncState) -> SyncEntity {
        let entity = SyncEntity::settings(name, SERVICE_TYPE).with_state(state);
        self.store
            .insert(entity.clone())
            .expect("failed to insert settings");
        entity
    }

    /// Inserts a link to `settings` in `state`, bound to a fresh project.
    pub fn link(&self, name: &str, settings: &SyncEntity, state: SyncState) -> SyncEntity {
        let entity = SyncEntity::link(name, settings, EntityId::new()).with_state(state);
        self.store
            .insert(entity.clone())
            .expect("failed to insert link");
        entity
    }

    /// Registers a user.
    pub fn user(&self, username: &str) -> User {
        let user = User {
            id: EntityId::new(),
            username: username.to_string(),
            full_name: String::new(),
        };
        self.credentials.add_user(user.clone());
        user
    }

    /// Registers a user as a member of `link`'s project, with one SSH key.
    pub fn member_key(&self, link: &SyncEntity, key_name: &str) -> SshPublicKey {
        let user = self.user(&format!("{key_name}-owner"));
        if let Some(project) = link.project {
            self.credentials.add_member(project, user.id);
        }
        let key = SshPublicKey {
            id: EntityId::new(),
            name: key_name.to_string(),
            fingerprint: format!("SHA256:{key_name}"),
            public_key: format!("ssh-ed25519 AAAAC3Nza {key_name}"),
            user_id: user.id,
        };
        self.credentials.add_ssh_key(key.clone());
        key
    }

    /// Returns the stored copy of `entity`.
    pub fn stored(&self, entity: &SyncEntity) -> SyncEntity {
        self.store
            .find_by_id(&entity.reference())
            .expect("store read failed")
            .expect("entity missing")
    }

    /// Returns the stored state of `entity`.
    pub fn state(&self, entity: &SyncEntity) -> SyncState {
        self.stored(entity).state
    }

    /// Submits a job to the local queue.
    pub fn submit(&self, job: Job) {
        self.queue.submit(job).expect("local queue rejected job");
    }

    /// Runs ready jobs until the queue has nothing ready.
    pub fn run(&self) -> RunStats {
        self.queue.run_until_idle(&self.orchestrator)
    }

    /// Runs jobs, advancing the virtual clock by up to `horizon`.
    pub fn run_for(&self, horizon: Duration) -> RunStats {
        self.queue.run_for(&self.orchestrator, horizon)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A file-backed store in a temporary directory.
pub struct TempFileStore {
    /// The store.
    pub store: Arc<FileStateStore>,
    dir: TempDir,
}

impl TempFileStore {
    /// Creates an empty store in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let store = Arc::new(FileStateStore::open(dir.path()).expect("failed to open file store"));
        Self { store, dir }
    }

    /// Directory holding the store.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}
