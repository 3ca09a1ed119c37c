//! Composable stages for entity tasks.
//!
//! An entity task is a base [`EntityAction`] wrapped by stages:
//!
//! - [`Guarded`] resolves the reference token and enters the action through
//!   the transition guard (or checks an expected state). Missing entities
//!   complete quietly, guard rejections abort the unit.
//! - [`CaptureError`] persists the action's error text on the entity before
//!   propagating the error to the failure continuation.
//!
//! The stages are plain values composed when the orchestrator dispatches a
//! task, so each can be exercised on its own.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::queue::{TaskOutcome, TaskQueue};
use crate::task::{Job, Task};
use conductor_core::{
    BackendError, BackendRegistry, CoreError, EntityRef, SyncEntity, SyncState, Transition,
    TransitionGuard,
};

/// Everything a stage may touch while running.
pub struct TaskContext<'a> {
    /// Transition guard over the state store.
    pub guard: &'a TransitionGuard,
    /// Backend registry.
    pub registry: &'a BackendRegistry,
    /// Queue for follow-up work.
    pub queue: &'a dyn TaskQueue,
    /// Engine configuration.
    pub config: &'a EngineConfig,
}

/// The body of an entity task.
pub trait EntityAction {
    /// Runs against the freshly resolved entity.
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()>;
}

/// How a [`Guarded`] stage admits an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Apply a transition; the action sees the refreshed entity.
    Apply(Transition),
    /// Require the entity to already be in this state.
    Expect(SyncState),
}

/// Transition-guard stage.
#[derive(Debug)]
pub struct Guarded<A> {
    entry: Entry,
    idempotent: bool,
    action: A,
}

impl<A: EntityAction> Guarded<A> {
    /// Enters `action` by applying `transition`.
    pub fn apply(transition: Transition, action: A) -> Self {
        Self {
            entry: Entry::Apply(transition),
            idempotent: false,
            action,
        }
    }

    /// Enters `action` only if the entity is in `state`.
    pub fn expect(state: SyncState, action: A) -> Self {
        Self {
            entry: Entry::Expect(state),
            idempotent: false,
            action,
        }
    }

    /// Treats an entity already at the transition's target as done.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Resolves `token`, enters, and runs the action.
    pub fn run(&self, ctx: &TaskContext<'_>, token: &str) -> TaskOutcome {
        let entity = match self.enter(ctx, token) {
            Ok(entity) => entity,
            Err(err) if err.is_not_found() => {
                tracing::info!(entity = token, error = %err, "entity no longer exists, skipping");
                return TaskOutcome::Done;
            }
            Err(EngineError::Core(CoreError::IllegalTransition {
                transition, actual, ..
            })) if self.idempotent && actual == transition.target() => {
                tracing::debug!(entity = token, state = %actual, "already at target state");
                return TaskOutcome::Done;
            }
            Err(err @ EngineError::Core(CoreError::IllegalTransition { .. }))
            | Err(err @ EngineError::UnexpectedState { .. }) => {
                return TaskOutcome::Aborted(err.to_string());
            }
            Err(err) => return TaskOutcome::Failed(err.to_string()),
        };

        match self.action.run(ctx, &entity) {
            Ok(()) => TaskOutcome::Done,
            Err(err) if err.is_illegal_transition() => TaskOutcome::Aborted(err.to_string()),
            Err(err) => TaskOutcome::Failed(err.to_string()),
        }
    }

    fn enter(&self, ctx: &TaskContext<'_>, token: &str) -> EngineResult<SyncEntity> {
        match self.entry {
            Entry::Apply(transition) => {
                let reference = EntityRef::parse(token)?;
                Ok(ctx.guard.apply(&reference, transition)?)
            }
            Entry::Expect(expected) => {
                let entity = ctx.guard.store().resolve(token)?;
                if entity.state != expected {
                    return Err(EngineError::UnexpectedState {
                        entity: token.to_string(),
                        expected,
                        actual: entity.state,
                    });
                }
                Ok(entity)
            }
        }
    }
}

/// Error-capture stage: records the error text on the entity.
#[derive(Debug)]
pub struct CaptureError<A>(pub A);

impl<A: EntityAction> EntityAction for CaptureError<A> {
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()> {
        let result = self.0.run(ctx, entity);
        if let Err(err) = &result {
            let message = err.to_string();
            if let Err(store_err) = ctx
                .guard
                .store()
                .set_error_message(&entity.reference(), &message)
            {
                tracing::warn!(entity = %entity.reference(), error = %store_err, "failed to record error message");
            }
        }
        result
    }
}

/// Pulls remote state through the entity's backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendSync;

impl EntityAction for BackendSync {
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()> {
        let backend = ctx.registry.backend_for(entity)?;
        match backend.sync() {
            Ok(()) | Err(BackendError::NotImplemented) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pings an erred entity's backend; resumes syncing if it answers, records
/// the failed probe otherwise.
#[derive(Debug, Clone, Copy)]
pub struct ProbeAndResume;

impl EntityAction for ProbeAndResume {
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()> {
        let probe = ctx
            .registry
            .backend_for(entity)
            .and_then(|backend| backend.ping());
        let token = entity.token();

        match probe {
            Ok(true) => {
                tracing::info!(entity = %token, name = %entity.name, "backend answered, resuming sync");
                ctx.queue.submit(sync_job(&token, true))
            }
            other => {
                let mut message = format!("Failed to ping {} {}", entity.kind.label(), entity.name);
                if let Err(err) = &other {
                    if !err.is_not_implemented() {
                        message = format!("{message}: {err}");
                    }
                }
                tracing::info!(entity = %token, error = %message, "recovery probe failed");
                ctx.guard
                    .apply_with_error(&entity.reference(), Transition::SetErred, &message)?;
                Ok(())
            }
        }
    }
}

/// Success continuation body: clears the error text after `→ IN_SYNC`.
#[derive(Debug, Clone, Copy)]
pub struct MarkInSync {
    /// Set when the pipeline was started by a recovery probe.
    pub recovering: bool,
}

impl EntityAction for MarkInSync {
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()> {
        if entity.has_error() {
            ctx.guard.store().set_error_message(&entity.reference(), "")?;
        }
        if self.recovering {
            tracing::info!(entity = %entity.reference(), name = %entity.name, "successfully recovered");
        } else {
            tracing::debug!(entity = %entity.reference(), "in sync");
        }
        Ok(())
    }
}

/// Failure continuation body: records the error text after `→ ERRED`.
#[derive(Debug, Clone)]
pub struct MarkErred {
    /// Set when the pipeline was started by a recovery probe.
    pub recovering: bool,
    /// Error text of the failed trigger.
    pub error: Option<String>,
}

impl EntityAction for MarkErred {
    fn run(&self, ctx: &TaskContext<'_>, entity: &SyncEntity) -> EngineResult<()> {
        let message = self.error.as_deref().unwrap_or("unknown error");
        ctx.guard
            .store()
            .set_error_message(&entity.reference(), message)?;
        if self.recovering {
            tracing::warn!(entity = %entity.reference(), name = %entity.name, error = message, "recovery failed");
        } else {
            tracing::error!(entity = %entity.reference(), name = %entity.name, error = message, "synchronization failed");
        }
        Ok(())
    }
}

/// Builds a `begin_syncing` job with both continuations.
pub fn sync_job(token: &str, recovering: bool) -> Job {
    Job::new(Task::BeginSyncing {
        entity: token.to_string(),
    })
    .on_success(Task::SyncSucceeded {
        entity: token.to_string(),
        recovering,
    })
    .on_failure(Task::SyncFailed {
        entity: token.to_string(),
        recovering,
        error: None,
    })
}

/// Builds a `begin_creating` job with both continuations.
pub fn creation_job(token: &str) -> Job {
    Job::new(Task::BeginCreating {
        entity: token.to_string(),
    })
    .on_success(Task::SyncSucceeded {
        entity: token.to_string(),
        recovering: false,
    })
    .on_failure(Task::SyncFailed {
        entity: token.to_string(),
        recovering: false,
        error: None,
    })
}
