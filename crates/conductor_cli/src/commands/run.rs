//! Run command implementation.
//!
//! Without `--daemon` the command drains a deterministic queue: every sweep
//! runs once and delayed retries are fast-forwarded on a virtual clock up to
//! `--horizon`. With `--daemon` it starts the worker pool and the periodic
//! sweeps and runs until interrupted.

use super::inspect;
use crate::fixture::Fixture;
use crate::simulated;
use conductor_core::{
    EntityKind, FileStateStore, MemoryCredentialStore, MemoryStateStore, StateStore,
};
use conductor_engine::{
    EngineConfig, Job, LocalQueue, Orchestrator, RunStats, Scheduler, Task, TaskQueue,
};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Opens the file store at `path`, or an empty in-memory store.
pub fn open_store(path: Option<&Path>) -> Result<Arc<dyn StateStore>, Box<dyn Error>> {
    match path {
        Some(path) => Ok(Arc::new(FileStateStore::open(path)?)),
        None => Ok(Arc::new(MemoryStateStore::new())),
    }
}

/// An orchestrator wired to a seeded store and simulated backends.
pub struct Deployment {
    /// State store.
    pub store: Arc<dyn StateStore>,
    /// Orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Jobs to submit before the first sweep.
    pub jobs: Vec<Job>,
}

impl Deployment {
    /// Seeds `store` from `fixture` and wires the orchestrator.
    pub fn new(
        store: Arc<dyn StateStore>,
        fixture: &Fixture,
        config: EngineConfig,
    ) -> Result<Self, Box<dyn Error>> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let report = fixture.seed(store.as_ref(), &credentials)?;
        tracing::info!(
            inserted = report.inserted,
            existing = report.existing,
            "fixture loaded"
        );

        let mut service_types = fixture.service_types();
        service_types.extend(
            inspect::all_entities(store.as_ref())?
                .into_iter()
                .map(|entity| entity.service_type),
        );
        service_types.sort();
        service_types.dedup();
        let registry = simulated::registry(&service_types, &fixture.backends);

        let jobs = fixture
            .tasks
            .iter()
            .cloned()
            .map(|task| job_for(task, &config))
            .collect();
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&store), registry, credentials).with_config(config),
        );

        Ok(Self {
            store,
            orchestrator,
            jobs,
        })
    }

    /// Runs one sync and one recovery sweep for both kinds on a local
    /// queue, advancing the virtual clock by up to `horizon`.
    pub fn run_once(&self, horizon: Duration) -> Result<RunStats, Box<dyn Error>> {
        let queue = LocalQueue::new();
        for job in &self.jobs {
            queue.submit(job.clone())?;
        }
        for job in sweep_jobs() {
            queue.submit(job)?;
        }

        let stats = queue.run_for(self.orchestrator.as_ref(), horizon);
        if !queue.is_idle() {
            tracing::warn!(
                pending = queue.pending(),
                delayed = queue.delayed(),
                "horizon reached with work outstanding"
            );
        }
        Ok(stats)
    }

    /// Runs the worker pool with periodic sweeps until Ctrl-C.
    pub async fn run_daemon(&self, workers: usize) -> Result<(), Box<dyn Error>> {
        let mut scheduler = Scheduler::start(self.orchestrator.clone(), workers)?;
        let handle = scheduler.handle();
        for job in self.jobs.iter().cloned().chain(sweep_jobs()) {
            handle.submit(job)?;
        }
        scheduler.schedule_sweeps(self.orchestrator.config());

        tracing::info!("running; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!(in_flight = handle.in_flight(), "shutting down");
        scheduler.shutdown().await;
        Ok(())
    }
}

fn sweep_jobs() -> Vec<Job> {
    [EntityKind::ServiceSettings, EntityKind::ServiceProjectLink]
        .into_iter()
        .flat_map(|kind| {
            [
                Job::new(Task::RecoverErred {
                    kind,
                    only: Vec::new(),
                }),
                Job::new(Task::SyncAll {
                    kind,
                    only: Vec::new(),
                }),
            ]
        })
        .collect()
}

fn job_for(task: Task, config: &EngineConfig) -> Job {
    match task {
        Task::PushSshKey { .. } | Task::AddUser { .. } => {
            Job::new(task).with_max_retries(config.ready_retry.max_retries)
        }
        task => Job::new(task),
    }
}

/// Options of the run command.
#[derive(Debug)]
pub struct RunOptions<'a> {
    /// Fixture to seed from.
    pub fixture: Option<&'a Path>,
    /// File store directory; memory when absent.
    pub store: Option<&'a Path>,
    /// Engine configuration.
    pub config: EngineConfig,
    /// Run the worker pool until interrupted.
    pub daemon: bool,
    /// Virtual time budget of a one-shot run.
    pub horizon: Duration,
}

/// Runs the run command.
pub fn run(options: RunOptions<'_>) -> Result<(), Box<dyn Error>> {
    let fixture = match options.fixture {
        Some(path) => Fixture::load(path)?,
        None => Fixture::default(),
    };
    let store = open_store(options.store)?;
    let workers = options.config.workers;
    let deployment = Deployment::new(store, &fixture, options.config)?;

    if options.daemon {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(deployment.run_daemon(workers))?;
    } else {
        let stats = deployment.run_once(options.horizon)?;
        println!(
            "executed {} jobs: {} completed, {} failed, {} aborted, {} retried, {} re-queued, {} gave up",
            stats.executed,
            stats.completed,
            stats.failed,
            stats.aborted,
            stats.retried,
            stats.requeued,
            stats.gave_up
        );
    }

    inspect::print_entities(&inspect::all_entities(deployment.store.as_ref())?);
    Ok(())
}
