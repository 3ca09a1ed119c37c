//! Queue abstraction, outcome settlement and the deterministic local queue.
//!
//! A worker takes a [`Job`], hands its task to an [`Executor`], and then
//! [`settle`]s the returned [`TaskOutcome`]: continuations are submitted,
//! not-ready units are re-queued with their delay, throttled units are
//! re-queued without consuming a retry.

use crate::error::EngineResult;
use crate::task::{Job, Task};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Error text handed to a failure continuation once the retry budget is spent.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Accepts jobs for asynchronous execution.
pub trait TaskQueue: Send + Sync {
    /// Enqueues a job for immediate execution.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerClosed` if the queue no longer accepts work.
    fn submit(&self, job: Job) -> EngineResult<()>;

    /// Enqueues a job to run after `delay`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerClosed` if the queue no longer accepts work.
    fn submit_delayed(&self, job: Job, delay: Duration) -> EngineResult<()>;
}

/// What a unit of work reports back to its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Completed; the success continuation runs.
    Done,
    /// Failed with a message; the failure continuation runs with it.
    Failed(String),
    /// Rejected by the transition guard; no continuation runs.
    Aborted(String),
    /// The target is not ready yet; retry after `delay` if budget remains.
    NotReady {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// A throttle slot was unavailable; re-queue after `delay`.
    Throttled {
        /// Delay before the next attempt.
        delay: Duration,
    },
}

/// Runs tasks. Implemented by the orchestrator.
pub trait Executor: Send + Sync {
    /// Executes one task. Follow-up work is submitted through `queue`.
    fn execute(&self, task: &Task, queue: &dyn TaskQueue) -> TaskOutcome;
}

/// How a job was settled after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Completed successfully.
    Completed,
    /// Failed; the failure continuation (if any) was submitted.
    Failed,
    /// Aborted by the transition guard.
    Aborted,
    /// Re-queued after a not-ready outcome.
    Retried,
    /// Re-queued after being throttled.
    Requeued,
    /// Retry budget exhausted.
    GaveUp,
}

/// Applies `outcome` to `job`: submits continuations or re-queues the job.
///
/// # Errors
///
/// Returns `SchedulerClosed` if a follow-up job could not be submitted.
pub fn settle(job: Job, outcome: TaskOutcome, queue: &dyn TaskQueue) -> EngineResult<Settled> {
    match outcome {
        TaskOutcome::Done => {
            if let Some(next) = job.on_success {
                queue.submit(Job::new(next))?;
            }
            Ok(Settled::Completed)
        }
        TaskOutcome::Failed(message) => {
            tracing::debug!(task = %job.task, error = %message, "unit failed");
            if let Some(next) = job.on_failure {
                queue.submit(Job::new(next.with_error(message)))?;
            }
            Ok(Settled::Failed)
        }
        TaskOutcome::Aborted(message) => {
            tracing::error!(task = %job.task, error = %message, "unit aborted");
            Ok(Settled::Aborted)
        }
        TaskOutcome::NotReady { delay } => {
            if job.can_retry() {
                tracing::debug!(
                    task = %job.task,
                    retry = job.retries + 1,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "not ready, retrying later"
                );
                queue.submit_delayed(job.retried(), delay)?;
                return Ok(Settled::Retried);
            }
            tracing::warn!(task = %job.task, retries = job.retries, "giving up: {MAX_RETRIES_EXCEEDED}");
            if let Some(next) = job.on_failure {
                queue.submit(Job::new(next.with_error(MAX_RETRIES_EXCEEDED)))?;
            }
            Ok(Settled::GaveUp)
        }
        TaskOutcome::Throttled { delay } => {
            tracing::debug!(task = %job.task, delay_ms = delay.as_millis() as u64, "throttled, re-queued");
            queue.submit_delayed(job, delay)?;
            Ok(Settled::Requeued)
        }
    }
}

/// Counters collected while draining a [`LocalQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Jobs executed.
    pub executed: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Jobs aborted.
    pub aborted: usize,
    /// Not-ready retries scheduled.
    pub retried: usize,
    /// Throttled re-queues.
    pub requeued: usize,
    /// Jobs that exhausted their retry budget.
    pub gave_up: usize,
}

impl RunStats {
    fn record(&mut self, settled: Settled) {
        self.executed += 1;
        match settled {
            Settled::Completed => self.completed += 1,
            Settled::Failed => self.failed += 1,
            Settled::Aborted => self.aborted += 1,
            Settled::Retried => self.retried += 1,
            Settled::Requeued => self.requeued += 1,
            Settled::GaveUp => self.gave_up += 1,
        }
    }

    fn merge(&mut self, other: RunStats) {
        self.executed += other.executed;
        self.completed += other.completed;
        self.failed += other.failed;
        self.aborted += other.aborted;
        self.retried += other.retried;
        self.requeued += other.requeued;
        self.gave_up += other.gave_up;
    }
}

#[derive(Debug)]
struct Delayed {
    due: Duration,
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct LocalState {
    ready: VecDeque<Job>,
    delayed: Vec<Delayed>,
    now: Duration,
    seq: u64,
}

/// A single-threaded queue driven by a virtual clock.
///
/// Nothing runs until the caller drains the queue, and delayed jobs only
/// become ready when the clock is advanced. Used by tests and by one-shot
/// command line runs.
#[derive(Debug, Default)]
pub struct LocalQueue {
    state: Mutex<LocalState>,
}

impl LocalQueue {
    /// Creates an empty queue at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of jobs ready to run.
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Number of jobs waiting for the clock.
    pub fn delayed(&self) -> usize {
        self.state.lock().delayed.len()
    }

    /// Returns true if nothing is ready or delayed.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.delayed.is_empty()
    }

    /// Copies of the ready jobs, in execution order.
    pub fn ready_jobs(&self) -> Vec<Job> {
        self.state.lock().ready.iter().cloned().collect()
    }

    /// Copies of the delayed jobs with their due times, earliest first.
    pub fn delayed_jobs(&self) -> Vec<(Duration, Job)> {
        let state = self.state.lock();
        let mut jobs: Vec<&Delayed> = state.delayed.iter().collect();
        jobs.sort_by_key(|d| (d.due, d.seq));
        jobs.into_iter().map(|d| (d.due, d.job.clone())).collect()
    }

    /// Moves the clock forward, releasing every delayed job that falls due.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += by;
        let now = state.now;

        let (mut due, waiting): (Vec<Delayed>, Vec<Delayed>) =
            state.delayed.drain(..).partition(|d| d.due <= now);
        state.delayed = waiting;
        due.sort_by_key(|d| (d.due, d.seq));
        state.ready.extend(due.into_iter().map(|d| d.job));
    }

    /// Executes ready jobs until none are left. Delayed jobs stay delayed.
    pub fn run_until_idle(&self, executor: &dyn Executor) -> RunStats {
        let mut stats = RunStats::default();
        loop {
            // The lock is released before execution so the executor can submit.
            let next = self.state.lock().ready.pop_front();
            let Some(job) = next else {
                return stats;
            };
            let outcome = executor.execute(&job.task, self);
            match settle(job, outcome, self) {
                Ok(settled) => stats.record(settled),
                Err(err) => tracing::warn!(error = %err, "failed to settle job"),
            }
        }
    }

    /// Drains the queue, jumping the clock from one due time to the next,
    /// for at most `horizon` of virtual time.
    pub fn run_for(&self, executor: &dyn Executor, horizon: Duration) -> RunStats {
        let deadline = self.now() + horizon;
        let mut stats = self.run_until_idle(executor);
        loop {
            let next_due = {
                let state = self.state.lock();
                state.delayed.iter().map(|d| d.due).min()
            };
            match next_due {
                Some(due) if due <= deadline => {
                    let now = self.now();
                    self.advance(due.saturating_sub(now));
                    stats.merge(self.run_until_idle(executor));
                }
                _ => return stats,
            }
        }
    }
}

impl TaskQueue for LocalQueue {
    fn submit(&self, job: Job) -> EngineResult<()> {
        self.state.lock().ready.push_back(job);
        Ok(())
    }

    fn submit_delayed(&self, job: Job, delay: Duration) -> EngineResult<()> {
        if delay.is_zero() {
            return self.submit(job);
        }
        let mut state = self.state.lock();
        let due = state.now + delay;
        let seq = state.seq;
        state.seq += 1;
        state.delayed.push(Delayed { due, seq, job });
        Ok(())
    }
}
