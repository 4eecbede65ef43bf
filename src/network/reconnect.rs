//! Reconnection scheduling and backoff.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Shortest wait handed to the poller while a reconnect is pending.
pub const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_MAX_RECONNECT_DELAY)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before reconnect attempt number `attempt` (1 for the first failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// A node waiting for its next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub due: Instant,
    pub delay: Duration,
}

/// Time-ordered set of nodes awaiting a reconnect.
///
/// Nodes due at the same instant keep insertion order. A node is scheduled at
/// most once.
#[derive(Debug, Default)]
pub struct ReconnectSchedule {
    queue: BTreeMap<(Instant, u64), usize>,
    index: HashMap<usize, ((Instant, u64), Duration)>,
    sequence: u64,
}

impl ReconnectSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `which` after `delay`; returns false if it is already waiting.
    pub fn schedule(&mut self, which: usize, now: Instant, delay: Duration) -> bool {
        if self.index.contains_key(&which) {
            return false;
        }
        let key = (now + delay, self.sequence);
        self.sequence += 1;
        self.queue.insert(key, which);
        self.index.insert(which, (key, delay));
        true
    }

    pub fn contains(&self, which: usize) -> bool {
        self.index.contains_key(&which)
    }

    pub fn pending(&self, which: usize) -> Option<PendingReconnect> {
        self.index
            .get(&which)
            .map(|&((due, _), delay)| PendingReconnect { due, delay })
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.keys().next().map(|&(due, _)| due)
    }

    /// Remove and return every node whose due time is not after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<usize> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let which = entry.remove();
            self.index.remove(&which);
            due.push(which);
        }
        due
    }

    /// How long the poller may block before the next reconnect falls due.
    pub fn poll_budget(&self, now: Instant) -> Option<Duration> {
        self.next_due()
            .map(|due| due.saturating_duration_since(now).max(MIN_POLL_WAIT))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }
}
