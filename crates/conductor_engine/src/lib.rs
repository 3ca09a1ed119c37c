//! # Conductor Engine
//!
//! Asynchronous driver of the backend synchronization state machine.
//!
//! This crate provides:
//! - Serializable units of work ([`Task`]) in a job envelope with success
//!   and failure continuations ([`Job`])
//! - A tokio worker pool ([`Scheduler`]) and a deterministic, virtual-clock
//!   queue ([`LocalQueue`]) behind one [`TaskQueue`] interface
//! - A named concurrency [`Throttle`]
//! - The [`Orchestrator`]: sync and recovery sweeps, composed entity stages,
//!   and retry-until-ready credential propagation
//!
//! ## Architecture
//!
//! A sweep reads the state store, enters the scheduled-action state through
//! the transition guard, and submits the backend unit. The unit's outcome is
//! settled by the worker: success and failure continuations move the entity
//! to `IN_SYNC` or `ERRED`. Erred entities are picked up by the next
//! recovery sweep, which probes the backend before resuming sync.
//!
//! ## Key Invariants
//!
//! - Only reference tokens cross the queue boundary
//! - A guard rejection aborts the unit; no continuation runs
//! - Missing entities and payloads complete the unit without retry
//! - Dependent operations never act on a link that is not `IN_SYNC`
//! - No lock is held across a backend call

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod orchestrator;
mod propagation;
mod queue;
mod scheduler;
mod stages;
mod task;
mod throttle;

pub use config::{
    EngineConfig, ReadyRetryConfig, SweepConfig, ThrottleConfig, SYNC_THROTTLE_KEY,
};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{Orchestrator, SweepReport};
pub use queue::{
    settle, Executor, LocalQueue, RunStats, Settled, TaskOutcome, TaskQueue, MAX_RETRIES_EXCEEDED,
};
pub use scheduler::{QueueHandle, Scheduler};
pub use stages::{
    creation_job, sync_job, BackendSync, CaptureError, EntityAction, Entry, Guarded, MarkErred,
    MarkInSync, ProbeAndResume, TaskContext,
};
pub use task::{Job, Task};
pub use throttle::{Throttle, ThrottlePermit};
