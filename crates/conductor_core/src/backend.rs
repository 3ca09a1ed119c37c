//! Backend adapter contract.
//!
//! A backend adapter translates engine operations into calls against one
//! provider's API. Adapters are expected to enforce their own request
//! timeouts and report them as [`BackendError::Timeout`].

use crate::credentials::{SshPublicKey, User};
use crate::entity::SyncEntity;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by backend adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The operation does not apply to this backend type.
    #[error("operation not implemented by backend")]
    NotImplemented,

    /// The remote call failed (authentication, validation, server error).
    #[error("{0}")]
    Request(String),

    /// The remote call did not complete in time.
    #[error("timeout")]
    Timeout,

    /// No adapter is registered for the service type.
    #[error("unsupported service type: {0}")]
    UnsupportedServiceType(String),
}

impl BackendError {
    /// Creates a request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    /// Returns true if the backend signalled that the operation is inapplicable.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, BackendError::NotImplemented)
    }
}

/// Operations the engine needs from a provider.
///
/// Every method defaults to [`BackendError::NotImplemented`], which the
/// engine treats as a successful no-op, so adapters only implement what
/// their provider supports.
pub trait ServiceBackend: Send + Sync {
    /// Probes whether the backend is reachable and accepts the credentials.
    fn ping(&self) -> BackendResult<bool> {
        Err(BackendError::NotImplemented)
    }

    /// Pulls remote state for the settings entry the adapter was built for.
    fn sync(&self) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }

    /// Opens an authenticated session scoped to `link`.
    fn create_session(&self, _link: &SyncEntity) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }

    /// Grants `user` access through `link`.
    fn add_user(&self, _user: &User, _link: &SyncEntity) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }

    /// Revokes `user`'s access through `link`.
    fn remove_user(&self, _user: &User, _link: &SyncEntity) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }

    /// Publishes `key` to the tenant behind `link`.
    fn add_ssh_key(&self, _key: &SshPublicKey, _link: &SyncEntity) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }

    /// Withdraws `key` from the tenant behind `link`.
    fn remove_ssh_key(&self, _key: &SshPublicKey, _link: &SyncEntity) -> BackendResult<()> {
        Err(BackendError::NotImplemented)
    }
}
