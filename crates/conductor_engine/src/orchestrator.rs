//! Synchronization orchestrator.
//!
//! The orchestrator owns the sweeps and dispatches every [`Task`] to its
//! composed stages. Sweeps enter the scheduled-action state synchronously
//! through the transition guard before submitting the asynchronous unit, so
//! two sweeps racing on the same entity cannot both schedule it.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::queue::{Executor, TaskOutcome, TaskQueue};
use crate::stages::{
    creation_job, sync_job, BackendSync, CaptureError, Guarded, MarkErred, MarkInSync,
    ProbeAndResume, TaskContext,
};
use crate::task::{Job, Task};
use crate::throttle::Throttle;
use conductor_core::{
    BackendError, BackendRegistry, CoreError, CredentialStore, EntityKind, EntityRef, StateStore,
    SyncEntity, SyncState, Transition, TransitionGuard,
};
use std::sync::Arc;

/// Counters reported by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entities whose pipeline was submitted.
    pub scheduled: usize,
    /// Entities skipped (wrong state, wrong kind, missing).
    pub skipped: usize,
    /// Entities another worker transitioned first.
    pub conflicts: usize,
}

/// Executes tasks against the state store, backends and credential directory.
pub struct Orchestrator {
    guard: TransitionGuard,
    registry: BackendRegistry,
    credentials: Arc<dyn CredentialStore>,
    throttle: Throttle,
    config: EngineConfig,
}

impl Orchestrator {
    /// Creates an orchestrator with the default configuration.
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: BackendRegistry,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            guard: TransitionGuard::new(store),
            registry,
            credentials,
            throttle: Throttle::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a throttle with other orchestrators.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Returns the state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        self.guard.store()
    }

    /// Returns the transition guard.
    pub fn guard(&self) -> &TransitionGuard {
        &self.guard
    }

    /// Returns the credential directory.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the throttle.
    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub(crate) fn context<'a>(&'a self, queue: &'a dyn TaskQueue) -> TaskContext<'a> {
        TaskContext {
            guard: &self.guard,
            registry: &self.registry,
            queue,
            config: &self.config,
        }
    }

    pub(crate) fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Registers a new entity, optionally queueing its creation.
    ///
    /// # Errors
    ///
    /// Returns `EntityExists` for a duplicate, or `IllegalTransition` if
    /// creation is requested for an entity not in `NEW`.
    pub fn register(&self, entity: SyncEntity, schedule_creation: bool) -> EngineResult<SyncEntity> {
        let reference = entity.reference();
        self.store().insert(entity)?;
        tracing::debug!(entity = %reference, "entity registered");
        if schedule_creation {
            return self.schedule_creation(&reference);
        }
        self.store()
            .find_by_id(&reference)?
            .ok_or_else(|| CoreError::not_found(reference).into())
    }

    /// Queues backend creation: `NEW → CREATION_SCHEDULED`. The next sync
    /// sweep picks the entity up.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` if the entity is not in `NEW`.
    pub fn schedule_creation(&self, entity: &EntityRef) -> EngineResult<SyncEntity> {
        Ok(self.guard.apply(entity, Transition::ScheduleCreating)?)
    }

    /// Sync sweep over `kind`.
    ///
    /// Selects `IN_SYNC` and `CREATION_SCHEDULED` entities, or exactly the
    /// entities named in `only`. The settings sweep holds a slot of the
    /// configured throttle while it runs.
    ///
    /// # Errors
    ///
    /// Returns `Throttled` if no throttle slot is free, or a store or queue
    /// error.
    pub fn sync_all(
        &self,
        kind: EntityKind,
        only: &[String],
        queue: &dyn TaskQueue,
    ) -> EngineResult<SweepReport> {
        let _permit = if kind == EntityKind::ServiceSettings {
            let throttle = &self.config.sync_throttle;
            Some(self.throttle.acquire(&throttle.key, throttle.max_concurrency)?)
        } else {
            None
        };

        let mut report = SweepReport::default();
        let entities = self.select(
            kind,
            only,
            &[SyncState::InSync, SyncState::CreationScheduled],
            &mut report,
        )?;
        for entity in entities {
            match self.schedule_entity(&entity, queue) {
                Ok(true) => report.scheduled += 1,
                Ok(false) => report.skipped += 1,
                Err(err) if err.is_illegal_transition() => {
                    tracing::error!(entity = %entity.reference(), error = %err, "sweep lost race for entity");
                    report.conflicts += 1;
                }
                Err(err) if err.is_not_found() => report.skipped += 1,
                Err(err) => return Err(err),
            }
        }
        tracing::info!(
            kind = %kind,
            scheduled = report.scheduled,
            skipped = report.skipped,
            conflicts = report.conflicts,
            "sync sweep finished"
        );
        Ok(report)
    }

    /// Schedules one entity seen by a sync sweep.
    ///
    /// Returns `Ok(false)` if the entity's state calls for no action.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` if the stored state no longer matches
    /// `entity`, which happens when another sweep got there first.
    pub fn schedule_entity(&self, entity: &SyncEntity, queue: &dyn TaskQueue) -> EngineResult<bool> {
        let reference = entity.reference();
        let token = reference.to_token();
        match entity.state {
            SyncState::InSync => {
                self.guard.apply(&reference, Transition::ScheduleSyncing)?;
                self.submit_or_mark_erred(&reference, sync_job(&token, false), queue)?;
                tracing::debug!(entity = %token, "sync scheduled");
                Ok(true)
            }
            SyncState::CreationScheduled if entity.kind.supports_creation() => {
                self.guard.apply(&reference, Transition::BeginCreating)?;
                self.submit_or_mark_erred(&reference, creation_job(&token), queue)?;
                tracing::debug!(entity = %token, "creation scheduled");
                Ok(true)
            }
            state => {
                tracing::warn!(entity = %token, state = %state, "cannot schedule sync, skipping");
                Ok(false)
            }
        }
    }

    /// Submits the job of an entity that was just moved out of a resting
    /// state. A refused submit leaves the entity `ERRED` with the queue
    /// error, where the next recovery sweep finds it.
    fn submit_or_mark_erred(
        &self,
        reference: &EntityRef,
        job: Job,
        queue: &dyn TaskQueue,
    ) -> EngineResult<()> {
        let Err(err) = queue.submit(job) else {
            return Ok(());
        };
        let message = err.to_string();
        match self
            .guard
            .apply_with_error(reference, Transition::SetErred, &message)
        {
            Ok(_) => {
                tracing::error!(entity = %reference, error = %message, "submit refused, entity marked erred");
            }
            Err(mark_err) => {
                tracing::error!(entity = %reference, error = %message, mark_error = %mark_err, "submit refused, entity left unmarked");
            }
        }
        Err(err)
    }

    /// Recovery sweep over erred entities of `kind` (or those named in `only`).
    ///
    /// Each erred entity moves to `SYNCING_SCHEDULED` and gets a liveness
    /// probe.
    ///
    /// # Errors
    ///
    /// Returns a store or queue error.
    pub fn recover_erred(
        &self,
        kind: EntityKind,
        only: &[String],
        queue: &dyn TaskQueue,
    ) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();
        let entities = self.select(kind, only, &[SyncState::Erred], &mut report)?;
        for entity in entities {
            let token = entity.token();
            if entity.state != SyncState::Erred {
                tracing::warn!(entity = %token, state = %entity.state, "not erred, skipping recovery");
                report.skipped += 1;
                continue;
            }
            let reference = entity.reference();
            match self.guard.apply(&reference, Transition::ScheduleSyncing) {
                Ok(_) => {
                    let job = Job::new(Task::BeginRecovering { entity: token });
                    self.submit_or_mark_erred(&reference, job, queue)?;
                    report.scheduled += 1;
                }
                Err(err) if err.is_illegal_transition() => {
                    tracing::error!(entity = %token, error = %err, "recovery lost race for entity");
                    report.conflicts += 1;
                }
                Err(err) if err.is_not_found() => report.skipped += 1,
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(kind = %kind, scheduled = report.scheduled, "recovery sweep finished");
        Ok(report)
    }

    /// Probes one erred link and, if its backend answers, moves the link and
    /// its settings from `ERRED` back to `IN_SYNC` with their errors cleared.
    ///
    /// Returns true if the backend answered.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn recover_erred_link(&self, link: &str) -> EngineResult<bool> {
        let link = match self.store().resolve(link) {
            Ok(link) => link,
            Err(err) if err.is_not_found() => {
                tracing::info!(entity = link, error = %err, "link no longer exists, skipping recovery");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        let settings = match link.settings {
            Some(settings) => self.store().find_by_id(&settings)?,
            None => None,
        };

        if !self.probe_link(&link) {
            tracing::info!(
                entity = %link.reference(),
                settings = settings.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
                "failed to recover service settings"
            );
            return Ok(false);
        }

        for entity in std::iter::once(&link).chain(settings.as_ref()) {
            if entity.state != SyncState::Erred {
                continue;
            }
            let reference = entity.reference();
            match self
                .guard
                .apply_with_error(&reference, Transition::SetInSyncFromErred, "")
            {
                Ok(_) => {
                    tracing::info!(entity = %reference, name = %entity.name, "successfully recovered");
                }
                Err(err) if err.is_illegal_transition() || err.is_not_found() => {
                    tracing::debug!(entity = %reference, error = %err, "recovery skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    fn probe_link(&self, link: &SyncEntity) -> bool {
        let backend = match self.registry.backend_for(link) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(entity = %link.reference(), error = %err, "no backend for link");
                return false;
            }
        };
        let probe = match backend.create_session(link) {
            Err(BackendError::NotImplemented) => backend.ping(),
            other => other.map(|()| true),
        };
        match probe {
            Ok(alive) => alive,
            Err(err) => {
                tracing::debug!(entity = %link.reference(), error = %err, "link probe failed");
                false
            }
        }
    }

    /// Resolves the sweep selection: entities of `kind` in `states`, or the
    /// entities named in `only`, whatever their state.
    fn select(
        &self,
        kind: EntityKind,
        only: &[String],
        states: &[SyncState],
        report: &mut SweepReport,
    ) -> EngineResult<Vec<SyncEntity>> {
        if only.is_empty() {
            let mut entities = Vec::new();
            for state in states {
                entities.extend(self.store().find_by_state(kind, *state)?);
            }
            return Ok(entities);
        }

        let mut entities = Vec::with_capacity(only.len());
        for token in only {
            match self.store().resolve(token) {
                Ok(entity) if entity.kind == kind => entities.push(entity),
                Ok(entity) => {
                    tracing::warn!(entity = %token, kind = %entity.kind, expected = %kind, "wrong entity kind, skipping");
                    report.skipped += 1;
                }
                Err(err) if err.is_not_found() => {
                    tracing::info!(entity = %token, error = %err, "entity no longer exists, skipping");
                    report.skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(entities)
    }
}

impl Executor for Orchestrator {
    fn execute(&self, task: &Task, queue: &dyn TaskQueue) -> TaskOutcome {
        tracing::trace!(task = %task, "executing");
        let ctx = self.context(queue);
        match task {
            Task::SyncAll { kind, only } => match self.sync_all(*kind, only, queue) {
                Ok(_) => TaskOutcome::Done,
                Err(EngineError::Throttled { key, max }) => {
                    tracing::debug!(key = %key, max, "sync sweep throttled");
                    TaskOutcome::Throttled {
                        delay: self.config.sync_throttle.retry_delay,
                    }
                }
                Err(err) => TaskOutcome::Failed(err.to_string()),
            },
            Task::RecoverErred { kind, only } => match self.recover_erred(*kind, only, queue) {
                Ok(_) => TaskOutcome::Done,
                Err(err) => TaskOutcome::Failed(err.to_string()),
            },
            Task::BeginSyncing { entity } => {
                Guarded::apply(Transition::BeginSyncing, CaptureError(BackendSync)).run(&ctx, entity)
            }
            Task::BeginCreating { entity } => {
                Guarded::expect(SyncState::Creating, CaptureError(BackendSync)).run(&ctx, entity)
            }
            Task::BeginRecovering { entity } => {
                Guarded::expect(SyncState::SyncingScheduled, ProbeAndResume).run(&ctx, entity)
            }
            Task::SyncSucceeded { entity, recovering } => Guarded::apply(
                Transition::SetInSync,
                MarkInSync {
                    recovering: *recovering,
                },
            )
            .idempotent()
            .run(&ctx, entity),
            Task::SyncFailed {
                entity,
                recovering,
                error,
            } => Guarded::apply(
                Transition::SetErred,
                MarkErred {
                    recovering: *recovering,
                    error: error.clone(),
                },
            )
            .idempotent()
            .run(&ctx, entity),
            Task::RecoverErredLink { link } => match self.recover_erred_link(link) {
                Ok(_) => TaskOutcome::Done,
                Err(err) => TaskOutcome::Failed(err.to_string()),
            },
            Task::PushSshKeys { links } => self.push_ssh_keys(links, queue),
            Task::PushSshKey { key, link } => self.push_ssh_key(key, link),
            Task::RemoveSshKey { key, link } => self.remove_ssh_key(key, link),
            Task::AddUser { user, link } => self.add_user(user, link),
            Task::RemoveUser { user, link } => self.remove_user(user, link),
        }
    }
}
