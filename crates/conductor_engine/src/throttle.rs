//! Named concurrency throttle.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Counting semaphores keyed by name, shared by every worker.
///
/// Acquisition never blocks: a caller that finds the key at capacity gets
/// `Throttled` and is expected to re-queue itself.
#[derive(Debug, Clone, Default)]
pub struct Throttle {
    slots: Arc<Mutex<HashMap<String, usize>>>,
}

impl Throttle {
    /// Creates a throttle with no slots held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a slot of `key` if fewer than `max` are held.
    ///
    /// # Errors
    ///
    /// Returns `Throttled` if `max` slots are already held.
    pub fn acquire(&self, key: &str, max: usize) -> EngineResult<ThrottlePermit> {
        let mut slots = self.slots.lock();
        let held = slots.entry(key.to_string()).or_insert(0);
        if *held >= max {
            return Err(EngineError::Throttled {
                key: key.to_string(),
                max,
            });
        }
        *held += 1;
        tracing::trace!(key, held = *held, max, "throttle slot acquired");
        Ok(ThrottlePermit {
            key: key.to_string(),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Number of slots of `key` currently held.
    pub fn in_use(&self, key: &str) -> usize {
        self.slots.lock().get(key).copied().unwrap_or(0)
    }
}

/// A held throttle slot; released on drop.
#[derive(Debug)]
pub struct ThrottlePermit {
    key: String,
    slots: Arc<Mutex<HashMap<String, usize>>>,
}

impl ThrottlePermit {
    /// Throttle key of this slot.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(held) = slots.get_mut(&self.key) {
            *held = held.saturating_sub(1);
            if *held == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
