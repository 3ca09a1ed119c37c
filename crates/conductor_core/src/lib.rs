//! # Conductor Core
//!
//! Entity model and state machine primitives for the Conductor
//! backend synchronization engine.
//!
//! This crate provides:
//! - Synchronizable entities (service settings, service project links)
//! - Reference tokens (`"<kind>:<id>"`) for crossing task boundaries
//! - The static transition table and the transition guard
//! - State stores (in-memory and file-backed) with conditional transitions
//! - The backend adapter contract and the backend registry
//! - The credential directory (SSH keys, users)
//!
//! ## Key Invariants
//!
//! - `state` only changes through [`TransitionGuard`]
//! - Every transition is a compare-and-set against the store
//! - `IN_SYNC` is the only state in which dependent operations may act
//! - Unknown or malformed reference tokens resolve to "not found"

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod credentials;
mod entity;
mod error;
mod registry;
mod state;
mod store;
mod transition;

pub use backend::{BackendError, BackendResult, ServiceBackend};
pub use credentials::{CredentialStore, MemoryCredentialStore, SshPublicKey, User};
pub use entity::{EntityId, EntityKind, EntityRef, ProjectId, SyncEntity};
pub use error::{CoreError, CoreResult};
pub use registry::{BackendProvider, BackendRegistry, BackendRegistryBuilder};
pub use state::SyncState;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use transition::{Transition, TransitionGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
