//! # Conductor Testkit
//!
//! Test utilities for the Conductor synchronization engine.
//!
//! This crate provides:
//! - A scripted backend adapter that records every call
//! - A harness wiring an orchestrator to in-memory collaborators and a
//!   deterministic queue
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_testkit::prelude::*;
//!
//! #[test]
//! fn sweep_syncs_entity() {
//!     let h = Harness::new();
//!     let settings = h.settings("cloud", SyncState::InSync);
//!     h.orchestrator.sync_all(EntityKind::ServiceSettings, &[], &h.queue).unwrap();
//!     h.run();
//!     assert_eq!(h.state(&settings), SyncState::InSync);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
