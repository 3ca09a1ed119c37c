//! Units of work and the job envelope.
//!
//! Only reference tokens and small payloads cross the queue boundary. Tokens
//! are carried as raw strings and resolved when the unit runs, so a token
//! that is malformed or whose entity has vanished is handled at execution
//! time like any other missing entity.

use conductor_core::{EntityId, EntityKind, SshPublicKey, User};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A serializable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Sync sweep over `kind`; an empty `only` selects by state.
    SyncAll {
        /// Entity kind to sweep.
        kind: EntityKind,
        /// Explicit reference tokens to sweep instead of selecting by state.
        #[serde(default)]
        only: Vec<String>,
    },
    /// Recovery sweep over erred entities of `kind`.
    RecoverErred {
        /// Entity kind to sweep.
        kind: EntityKind,
        /// Explicit reference tokens to sweep instead of selecting by state.
        #[serde(default)]
        only: Vec<String>,
    },
    /// Moves the entity into `SYNCING` and pulls backend state.
    BeginSyncing {
        /// Reference token.
        entity: String,
    },
    /// Provisions the entity on its backend (the entity is already `CREATING`).
    BeginCreating {
        /// Reference token.
        entity: String,
    },
    /// Probes an erred entity and resumes syncing if the backend answers.
    BeginRecovering {
        /// Reference token.
        entity: String,
    },
    /// Success continuation: `SYNCING | CREATING → IN_SYNC`.
    SyncSucceeded {
        /// Reference token.
        entity: String,
        /// Set when the pipeline was started by a recovery probe.
        #[serde(default)]
        recovering: bool,
    },
    /// Failure continuation: `→ ERRED` with the captured error text.
    SyncFailed {
        /// Reference token.
        entity: String,
        /// Set when the pipeline was started by a recovery probe.
        #[serde(default)]
        recovering: bool,
        /// Error text, filled in by the scheduler when the trigger fails.
        #[serde(default)]
        error: Option<String>,
    },
    /// Probes one erred link and heals it together with its settings.
    RecoverErredLink {
        /// Link reference token.
        link: String,
    },
    /// Fans out a key push for every project member key of each link.
    PushSshKeys {
        /// Link reference tokens.
        links: Vec<String>,
    },
    /// Publishes one SSH key to a link once the link is in sync.
    PushSshKey {
        /// Key identifier.
        key: EntityId,
        /// Link reference token.
        link: String,
    },
    /// Withdraws an SSH key that may already be deleted locally.
    RemoveSshKey {
        /// Serialized key.
        key: SshPublicKey,
        /// Link reference token.
        link: String,
    },
    /// Grants a user access through a link once the link is in sync.
    AddUser {
        /// User identifier.
        user: EntityId,
        /// Link reference token.
        link: String,
    },
    /// Revokes a user that may already be deleted locally.
    RemoveUser {
        /// Serialized user.
        user: User,
        /// Link reference token.
        link: String,
    },
}

impl Task {
    /// Snake-case task name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Task::SyncAll { .. } => "sync_all",
            Task::RecoverErred { .. } => "recover_erred",
            Task::BeginSyncing { .. } => "begin_syncing",
            Task::BeginCreating { .. } => "begin_creating",
            Task::BeginRecovering { .. } => "begin_recovering",
            Task::SyncSucceeded { .. } => "sync_succeeded",
            Task::SyncFailed { .. } => "sync_failed",
            Task::RecoverErredLink { .. } => "recover_erred_link",
            Task::PushSshKeys { .. } => "push_ssh_keys",
            Task::PushSshKey { .. } => "push_ssh_key",
            Task::RemoveSshKey { .. } => "remove_ssh_key",
            Task::AddUser { .. } => "add_user",
            Task::RemoveUser { .. } => "remove_user",
        }
    }

    /// Fills in the error text of a failure continuation; other tasks are
    /// returned unchanged.
    #[must_use]
    pub fn with_error(self, message: impl Into<String>) -> Self {
        match self {
            Task::SyncFailed {
                entity, recovering, ..
            } => Task::SyncFailed {
                entity,
                recovering,
                error: Some(message.into()),
            },
            other => other,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::SyncAll { kind, .. } | Task::RecoverErred { kind, .. } => {
                write!(f, "{}({kind})", self.name())
            }
            Task::BeginSyncing { entity }
            | Task::BeginCreating { entity }
            | Task::BeginRecovering { entity }
            | Task::SyncSucceeded { entity, .. }
            | Task::SyncFailed { entity, .. } => write!(f, "{}({entity})", self.name()),
            Task::RecoverErredLink { link } => write!(f, "{}({link})", self.name()),
            Task::PushSshKeys { links } => write!(f, "{}({} links)", self.name(), links.len()),
            Task::PushSshKey { key, link } => write!(f, "{}({key}, {link})", self.name()),
            Task::RemoveSshKey { key, link } => write!(f, "{}({}, {link})", self.name(), key.id),
            Task::AddUser { user, link } => write!(f, "{}({user}, {link})", self.name()),
            Task::RemoveUser { user, link } => write!(f, "{}({}, {link})", self.name(), user.id),
        }
    }
}

/// A task plus its continuations and retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier, stable across retries.
    pub id: Uuid,
    /// The unit of work.
    pub task: Task,
    /// Submitted after the task completes successfully.
    #[serde(default)]
    pub on_success: Option<Task>,
    /// Submitted, with the error text, after the task fails.
    #[serde(default)]
    pub on_failure: Option<Task>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retries: u32,
    /// Retry budget for not-ready outcomes.
    #[serde(default)]
    pub max_retries: u32,
}

impl Job {
    /// Wraps a task with no continuations and no retry budget.
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            on_success: None,
            on_failure: None,
            retries: 0,
            max_retries: 0,
        }
    }

    /// Sets the success continuation.
    #[must_use]
    pub fn on_success(mut self, task: Task) -> Self {
        self.on_success = Some(task);
        self
    }

    /// Sets the failure continuation.
    #[must_use]
    pub fn on_failure(mut self, task: Task) -> Self {
        self.on_failure = Some(task);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns true if another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Returns the same job with one more retry consumed.
    #[must_use]
    pub fn retried(mut self) -> Self {
        self.retries += 1;
        self
    }
}

impl From<Task> for Job {
    fn from(task: Task) -> Self {
        Job::new(task)
    }
}
