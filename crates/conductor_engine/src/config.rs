//! Configuration for the synchronization engine.

use rand::Rng;
use std::time::Duration;

/// Throttle key guarding the full sync sweep.
pub const SYNC_THROTTLE_KEY: &str = "service_settings_sync";

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of scheduler workers.
    pub workers: usize,
    /// Periodic sync sweep.
    pub sync_sweep: SweepConfig,
    /// Periodic recovery sweep over erred entities.
    pub recovery_sweep: SweepConfig,
    /// Retry policy for operations waiting on a link to become `IN_SYNC`.
    pub ready_retry: ReadyRetryConfig,
    /// Admission limit for the sync sweep.
    pub sync_throttle: ThrottleConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            workers: 4,
            sync_sweep: SweepConfig::new(Duration::from_secs(60 * 60)),
            recovery_sweep: SweepConfig::new(Duration::from_secs(30 * 60)),
            ready_retry: ReadyRetryConfig::default(),
            sync_throttle: ThrottleConfig::default(),
        }
    }

    /// Sets the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the sync sweep configuration.
    pub fn with_sync_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sync_sweep = sweep;
        self
    }

    /// Sets the recovery sweep configuration.
    pub fn with_recovery_sweep(mut self, sweep: SweepConfig) -> Self {
        self.recovery_sweep = sweep;
        self
    }

    /// Sets the retry-until-ready policy.
    pub fn with_ready_retry(mut self, retry: ReadyRetryConfig) -> Self {
        self.ready_retry = retry;
        self
    }

    /// Sets the sync sweep throttle.
    pub fn with_sync_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.sync_throttle = throttle;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Interval and jitter of a periodic sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Base interval between sweeps.
    pub interval: Duration,
    /// Maximum additive jitter as a fraction of `interval` (0.0 disables it).
    pub jitter: f64,
}

impl SweepConfig {
    /// Creates a sweep configuration with 10% jitter.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: 0.1,
        }
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay until the next sweep: `interval` plus up to `jitter * interval`.
    pub fn next_delay(&self) -> Duration {
        if self.jitter <= 0.0 || self.interval.is_zero() {
            return self.interval;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        self.interval + self.interval.mul_f64(extra)
    }
}

/// Fixed-interval retry policy for dependent operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyRetryConfig {
    /// Maximum number of re-invocations after the first attempt.
    pub max_retries: u32,
    /// Delay between invocations.
    pub delay: Duration,
}

impl ReadyRetryConfig {
    /// Creates a policy.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total time an operation may wait for its link.
    pub fn window(&self) -> Duration {
        self.delay * self.max_retries
    }
}

impl Default for ReadyRetryConfig {
    /// 120 retries, 30 seconds apart: one hour of waiting.
    fn default() -> Self {
        Self::new(120, Duration::from_secs(30))
    }
}

/// Named concurrency limit for a heavy task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Throttle key shared by every worker.
    pub key: String,
    /// Maximum concurrent holders.
    pub max_concurrency: usize,
    /// Delay before a blocked invocation is re-queued.
    pub retry_delay: Duration,
}

impl ThrottleConfig {
    /// Creates a throttle configuration.
    pub fn new(key: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            key: key.into(),
            max_concurrency: max_concurrency.max(1),
            retry_delay: Duration::from_secs(10),
        }
    }

    /// Sets the re-queue delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(SYNC_THROTTLE_KEY, 2)
    }
}
