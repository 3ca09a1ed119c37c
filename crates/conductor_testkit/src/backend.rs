//! Scripted backend adapter.
//!
//! Replies are scripted per operation: one-shot replies are consumed in
//! order, after which the operation's default reply is returned. Every call
//! is recorded.

use conductor_core::{BackendError, BackendResult, ServiceBackend, SshPublicKey, SyncEntity, User};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ping`
    Ping,
    /// `sync`
    Sync,
    /// `create_session`
    CreateSession,
    /// `add_user`
    AddUser,
    /// `remove_user`
    RemoveUser,
    /// `add_ssh_key`
    AddSshKey,
    /// `remove_ssh_key`
    RemoveSshKey,
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation invoked.
    pub operation: Operation,
    /// Link token, for link-scoped operations.
    pub link: Option<String>,
    /// Key name or username, for credential operations.
    pub subject: Option<String>,
}

/// A backend adapter whose replies are scripted by the test.
#[derive(Debug)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<Operation, VecDeque<BackendResult<()>>>>,
    defaults: Mutex<HashMap<Operation, BackendResult<()>>>,
    alive: Mutex<bool>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    /// Creates a backend where every operation succeeds and `ping` answers.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            alive: Mutex::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a backend that implements nothing.
    pub fn not_implemented() -> Self {
        let backend = Self::new();
        for operation in [
            Operation::Ping,
            Operation::Sync,
            Operation::CreateSession,
            Operation::AddUser,
            Operation::RemoveUser,
            Operation::AddSshKey,
            Operation::RemoveSshKey,
        ] {
            backend.set_default(operation, Err(BackendError::NotImplemented));
        }
        backend
    }

    /// Sets the reply used once scripted replies run out.
    #[must_use]
    pub fn with_default(self, operation: Operation, reply: BackendResult<()>) -> Self {
        self.set_default(operation, reply);
        self
    }

    /// Sets the reply used once scripted replies run out.
    pub fn set_default(&self, operation: Operation, reply: BackendResult<()>) {
        self.defaults.lock().insert(operation, reply);
    }

    /// Queues a one-shot reply.
    pub fn push(&self, operation: Operation, reply: BackendResult<()>) {
        self.replies
            .lock()
            .entry(operation)
            .or_default()
            .push_back(reply);
    }

    /// Sets what a successful `ping` answers.
    pub fn set_alive(&self, alive: bool) {
        *self.alive.lock() = alive;
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_of(&self, operation: Operation) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    /// Number of recorded calls of one operation.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    fn reply(
        &self,
        operation: Operation,
        link: Option<&SyncEntity>,
        subject: Option<&str>,
    ) -> BackendResult<()> {
        self.calls.lock().push(Call {
            operation,
            link: link.map(SyncEntity::token),
            subject: subject.map(str::to_string),
        });
        let scripted = self
            .replies
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            self.defaults
                .lock()
                .get(&operation)
                .cloned()
                .unwrap_or(Ok(()))
        })
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceBackend for ScriptedBackend {
    fn ping(&self) -> BackendResult<bool> {
        self.reply(Operation::Ping, None, None)
            .map(|()| *self.alive.lock())
    }

    fn sync(&self) -> BackendResult<()> {
        self.reply(Operation::Sync, None, None)
    }

    fn create_session(&self, link: &SyncEntity) -> BackendResult<()> {
        self.reply(Operation::CreateSession, Some(link), None)
    }

    fn add_user(&self, user: &User, link: &SyncEntity) -> BackendResult<()> {
        self.reply(Operation::AddUser, Some(link), Some(&user.username))
    }

    fn remove_user(&self, user: &User, link: &SyncEntity) -> BackendResult<()> {
        self.reply(Operation::RemoveUser, Some(link), Some(&user.username))
    }

    fn add_ssh_key(&self, key: &SshPublicKey, link: &SyncEntity) -> BackendResult<()> {
        self.reply(Operation::AddSshKey, Some(link), Some(&key.name))
    }

    fn remove_ssh_key(&self, key: &SshPublicKey, link: &SyncEntity) -> BackendResult<()> {
        self.reply(Operation::RemoveSshKey, Some(link), Some(&key.name))
    }
}
