//! Tokio worker pool.
//!
//! Jobs flow through an unbounded mpsc channel shared by `workers` tasks.
//! Each unit body calls blocking backend adapters, so it runs on the
//! blocking pool; the async workers only move jobs around. Delayed jobs are
//! parked in a sleeping task and sent to the channel when due.

use crate::config::{EngineConfig, SweepConfig};
use crate::error::{EngineError, EngineResult};
use crate::queue::{settle, Executor, TaskQueue};
use crate::task::{Job, Task};
use conductor_core::EntityKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Cloneable submission handle for a running [`Scheduler`].
///
/// A job counts as in flight from submission (including its delay) until
/// a worker has settled it.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Job>,
    runtime: Handle,
    in_flight: Arc<AtomicUsize>,
}

impl QueueHandle {
    /// Jobs submitted and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn send(&self, job: Job) -> EngineResult<()> {
        self.tx.send(job).map_err(|_| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            EngineError::SchedulerClosed
        })
    }
}

impl TaskQueue for QueueHandle {
    fn submit(&self, job: Job) -> EngineResult<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.send(job)
    }

    fn submit_delayed(&self, job: Job, delay: Duration) -> EngineResult<()> {
        if self.tx.is_closed() {
            return Err(EngineError::SchedulerClosed);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let handle = self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if handle.send(job).is_err() {
                tracing::debug!("scheduler closed before delayed job became due");
            }
        });
        Ok(())
    }
}

/// A pool of workers executing jobs through an [`Executor`].
pub struct Scheduler {
    handle: QueueHandle,
    workers: Vec<JoinHandle<()>>,
    periodic: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    /// Starts `workers` workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Runtime` when called outside a tokio runtime.
    pub fn start(executor: Arc<dyn Executor>, workers: usize) -> EngineResult<Self> {
        let runtime = Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = QueueHandle {
            tx,
            runtime: runtime.clone(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };

        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|id| {
                runtime.spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&executor),
                    handle.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect::<Vec<_>>();
        tracing::info!(workers = workers.len(), "scheduler started");

        Ok(Self {
            handle,
            workers,
            periodic: Vec::new(),
            shutdown,
        })
    }

    /// Returns a submission handle.
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Submits `task` every `sweep.next_delay()`, starting one delay from now.
    pub fn schedule_periodic(&mut self, task: Task, sweep: SweepConfig) {
        let handle = self.handle.clone();
        let mut shutdown = self.shutdown.subscribe();
        let periodic = self.handle.runtime.spawn(async move {
            loop {
                let delay = sweep.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
                tracing::debug!(task = %task, "periodic tick");
                if handle.submit(Job::new(task.clone())).is_err() {
                    break;
                }
            }
        });
        self.periodic.push(periodic);
    }

    /// Registers the sync and recovery sweeps for both entity kinds.
    pub fn schedule_sweeps(&mut self, config: &EngineConfig) {
        for kind in [EntityKind::ServiceSettings, EntityKind::ServiceProjectLink] {
            self.schedule_periodic(
                Task::SyncAll {
                    kind,
                    only: Vec::new(),
                },
                config.sync_sweep.clone(),
            );
            self.schedule_periodic(
                Task::RecoverErred {
                    kind,
                    only: Vec::new(),
                },
                config.recovery_sweep.clone(),
            );
        }
    }

    /// Waits until no job is in flight.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if work is still in flight after `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        while self.handle.in_flight() > 0 {
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Stops the periodic drivers and the workers. Jobs still queued are
    /// dropped; a unit already running finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for periodic in self.periodic {
            let _ = periodic.await;
        }
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "worker terminated abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    executor: Arc<dyn Executor>,
    handle: QueueHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                job = rx.recv() => job,
                _ = shutdown.changed() => None,
            }
        };
        let Some(job) = next else {
            break;
        };

        let executor = Arc::clone(&executor);
        let queue = handle.clone();
        let task = job.task.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let outcome = executor.execute(&job.task, &queue);
            settle(job, outcome, &queue)
        })
        .await;

        match result {
            Ok(Ok(settled)) => tracing::trace!(worker = id, task = %task, ?settled, "job settled"),
            Ok(Err(err)) => tracing::warn!(worker = id, task = %task, error = %err, "failed to settle job"),
            Err(err) => tracing::error!(worker = id, task = %task, error = %err, "unit panicked"),
        }
        handle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskOutcome;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        runs: AtomicU32,
        not_ready_first: bool,
    }

    impl Executor for Counting {
        fn execute(&self, task: &Task, _queue: &dyn TaskQueue) -> TaskOutcome {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.not_ready_first && run == 0 && task.name() == "push_ssh_keys" {
                return TaskOutcome::NotReady {
                    delay: Duration::from_millis(20),
                };
            }
            TaskOutcome::Done
        }
    }

    fn counting(not_ready_first: bool) -> Arc<Counting> {
        Arc::new(Counting {
            runs: AtomicU32::new(0),
            not_ready_first,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_jobs_and_continuations() {
        let executor = counting(false);
        let scheduler = Scheduler::start(executor.clone(), 3).unwrap();
        let handle = scheduler.handle();
        for _ in 0..10 {
            handle
                .submit(
                    Job::new(Task::BeginSyncing {
                        entity: "service_settings:x".into(),
                    })
                    .on_success(Task::SyncSucceeded {
                        entity: "service_settings:x".into(),
                        recovering: false,
                    }),
                )
                .unwrap();
        }
        scheduler.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(executor.runs.load(Ordering::SeqCst), 20);
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn not_ready_job_is_retried_after_delay() {
        let executor = counting(true);
        let scheduler = Scheduler::start(executor.clone(), 2).unwrap();
        scheduler
            .handle()
            .submit(Job::new(Task::PushSshKeys { links: vec![] }).with_max_retries(3))
            .unwrap();
        scheduler.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_task_ticks() {
        let executor = counting(false);
        let mut scheduler = Scheduler::start(executor.clone(), 1).unwrap();
        scheduler.schedule_periodic(
            Task::SyncAll {
                kind: EntityKind::ServiceSettings,
                only: Vec::new(),
            },
            SweepConfig::new(Duration::from_millis(10)).with_jitter(0.0),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.runs.load(Ordering::SeqCst) >= 2);
        scheduler.shutdown().await;
    }

    #[test]
    fn start_outside_runtime_fails() {
        let result = Scheduler::start(counting(false), 1);
        assert!(matches!(result, Err(EngineError::Runtime(_))));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let scheduler = Scheduler::start(counting(false), 1).unwrap();
        let handle = scheduler.handle();
        scheduler.shutdown().await;
        assert!(matches!(
            handle.submit(Job::new(Task::PushSshKeys { links: vec![] })),
            Err(EngineError::SchedulerClosed)
        ));
    }
}
