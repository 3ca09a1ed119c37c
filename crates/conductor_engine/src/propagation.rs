//! Credential propagation with retry-until-ready.
//!
//! Pushing a key or adding a user only makes sense once the link is
//! `IN_SYNC`. Until then the unit reports `NotReady` and the scheduler
//! re-queues it after the configured delay, up to the configured number of
//! retries. An erred link is never acted on. Removals carry the payload
//! itself and are not gated on the link state.

use crate::orchestrator::Orchestrator;
use crate::queue::{TaskOutcome, TaskQueue};
use crate::task::{Job, Task};
use conductor_core::{
    BackendError, BackendResult, EntityId, ServiceBackend, SshPublicKey, SyncEntity, SyncState,
    User,
};
use std::sync::Arc;

/// Readiness of a link for dependent operations.
#[derive(Debug)]
enum Readiness {
    Ready(SyncEntity),
    Missing,
    Erred,
    Pending(SyncState),
}

impl Orchestrator {
    /// Builds a `push_ssh_key` job carrying the ready-retry budget.
    pub fn push_ssh_key_job(&self, key: EntityId, link: impl Into<String>) -> Job {
        Job::new(Task::PushSshKey {
            key,
            link: link.into(),
        })
        .with_max_retries(self.config().ready_retry.max_retries)
    }

    /// Builds an `add_user` job carrying the ready-retry budget.
    pub fn add_user_job(&self, user: EntityId, link: impl Into<String>) -> Job {
        Job::new(Task::AddUser {
            user,
            link: link.into(),
        })
        .with_max_retries(self.config().ready_retry.max_retries)
    }

    /// Builds a `remove_ssh_key` job from the key about to be deleted.
    pub fn remove_ssh_key_job(&self, key: SshPublicKey, link: impl Into<String>) -> Job {
        Job::new(Task::RemoveSshKey {
            key,
            link: link.into(),
        })
    }

    /// Builds a `remove_user` job from the user about to be deleted.
    pub fn remove_user_job(&self, user: User, link: impl Into<String>) -> Job {
        Job::new(Task::RemoveUser {
            user,
            link: link.into(),
        })
    }

    /// Submits one key push per project member key of each link.
    pub(crate) fn push_ssh_keys(&self, links: &[String], queue: &dyn TaskQueue) -> TaskOutcome {
        for token in links {
            let link = match self.store().resolve(token) {
                Ok(link) => link,
                Err(err) if err.is_not_found() => {
                    tracing::info!(entity = %token, error = %err, "link no longer exists, skipping key push");
                    continue;
                }
                Err(err) => return TaskOutcome::Failed(err.to_string()),
            };
            let Some(project) = link.project else {
                tracing::debug!(entity = %token, "link has no project, no keys to push");
                continue;
            };

            let keys = self.credentials().ssh_keys_for_project(&project);
            if keys.is_empty() {
                tracing::debug!(entity = %token, "no ssh keys to push");
                continue;
            }
            for key in keys {
                if let Err(err) = queue.submit(self.push_ssh_key_job(key.id, token.clone())) {
                    return TaskOutcome::Failed(err.to_string());
                }
            }
        }
        TaskOutcome::Done
    }

    /// Publishes one SSH key once the link is in sync.
    pub(crate) fn push_ssh_key(&self, key: &EntityId, link: &str) -> TaskOutcome {
        let Some(link) = self.resolve_link(link) else {
            return TaskOutcome::Done;
        };
        let Some(key) = self.credentials().ssh_key(key) else {
            tracing::info!(key = %key, entity = %link.reference(), "ssh key no longer exists, skipping push");
            return TaskOutcome::Done;
        };
        self.when_ready(link, "push_ssh_key", |backend, link| {
            backend.add_ssh_key(&key, link)
        })
    }

    /// Grants a user access once the link is in sync.
    pub(crate) fn add_user(&self, user: &EntityId, link: &str) -> TaskOutcome {
        let Some(link) = self.resolve_link(link) else {
            return TaskOutcome::Done;
        };
        let Some(user) = self.credentials().user(user) else {
            tracing::info!(user = %user, entity = %link.reference(), "user no longer exists, skipping");
            return TaskOutcome::Done;
        };
        self.when_ready(link, "add_user", |backend, link| backend.add_user(&user, link))
    }

    /// Withdraws an SSH key regardless of the link state.
    pub(crate) fn remove_ssh_key(&self, key: &SshPublicKey, link: &str) -> TaskOutcome {
        let Some(link) = self.resolve_link(link) else {
            return TaskOutcome::Done;
        };
        self.invoke(&link, "remove_ssh_key", |backend, link| {
            backend.remove_ssh_key(key, link)
        });
        TaskOutcome::Done
    }

    /// Revokes a user regardless of the link state.
    pub(crate) fn remove_user(&self, user: &User, link: &str) -> TaskOutcome {
        let Some(link) = self.resolve_link(link) else {
            return TaskOutcome::Done;
        };
        self.invoke(&link, "remove_user", |backend, link| {
            backend.remove_user(user, link)
        });
        TaskOutcome::Done
    }

    fn resolve_link(&self, token: &str) -> Option<SyncEntity> {
        match self.store().resolve(token) {
            Ok(link) => Some(link),
            Err(err) => {
                tracing::info!(entity = token, error = %err, "link no longer exists, skipping");
                None
            }
        }
    }

    fn readiness(&self, link: SyncEntity) -> Readiness {
        // Re-read so a state change since resolution is not missed.
        let link = match self.store().find_by_id(&link.reference()) {
            Ok(Some(link)) => link,
            Ok(None) => return Readiness::Missing,
            Err(err) => {
                tracing::warn!(entity = %link.reference(), error = %err, "failed to read link state");
                return Readiness::Pending(link.state);
            }
        };
        match link.state {
            SyncState::InSync => Readiness::Ready(link),
            SyncState::Erred => Readiness::Erred,
            state => Readiness::Pending(state),
        }
    }

    fn when_ready<F>(&self, link: SyncEntity, operation: &str, call: F) -> TaskOutcome
    where
        F: FnOnce(&Arc<dyn ServiceBackend>, &SyncEntity) -> BackendResult<()>,
    {
        let token = link.token();
        match self.readiness(link) {
            Readiness::Ready(link) => {
                self.invoke(&link, operation, call);
                TaskOutcome::Done
            }
            Readiness::Missing => {
                tracing::info!(entity = %token, operation, "link no longer exists, skipping");
                TaskOutcome::Done
            }
            Readiness::Erred => {
                tracing::info!(entity = %token, operation, "link is erred, giving up");
                TaskOutcome::Done
            }
            Readiness::Pending(state) => {
                tracing::debug!(entity = %token, state = %state, operation, "link not ready");
                TaskOutcome::NotReady {
                    delay: self.config().ready_retry.delay,
                }
            }
        }
    }

    fn invoke<F>(&self, link: &SyncEntity, operation: &str, call: F)
    where
        F: FnOnce(&Arc<dyn ServiceBackend>, &SyncEntity) -> BackendResult<()>,
    {
        let result = self
            .registry()
            .backend_for(link)
            .and_then(|backend| call(&backend, link));
        match result {
            Ok(()) => {
                tracing::info!(entity = %link.reference(), operation, "propagated to backend");
            }
            Err(BackendError::NotImplemented) => {
                tracing::debug!(entity = %link.reference(), operation, "not supported by backend");
            }
            Err(err) => {
                tracing::warn!(entity = %link.reference(), operation, error = %err, "backend call failed");
            }
        }
    }
}
