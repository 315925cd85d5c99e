//! Single-shot cancelable timers.

use serde::Serialize;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Opaque token for one pending timer. Handles are never reused, so a stale
/// handle can never match a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[cfg(test)]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

pub trait TimerService {
    fn schedule(&mut self, after: Duration) -> TimerHandle;
    /// Cancelled handles never come back from the service as expired.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Deadline table polled by the daemon loop.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    pending: HashMap<TimerHandle, Instant>,
    // latest `now` seen by pop_due; timers armed while handling an expiry
    // count from it
    clock: Option<Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, now: Instant, after: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.pending.insert(handle, now + after);
        handle
    }

    /// Removes and returns the earliest timer due at `now`. Handling one
    /// expiry may cancel the next, so callers pop one at a time.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerHandle> {
        self.clock = Some(self.clock.map_or(now, |c| c.max(now)));
        let handle = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .min_by_key(|(h, deadline)| (**deadline, **h))
            .map(|(h, _)| *h)?;
        self.pending.remove(&handle);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl TimerService for TimerQueue {
    fn schedule(&mut self, after: Duration) -> TimerHandle {
        let now = Instant::now();
        let now = self.clock.map_or(now, |c| c.max(now));
        self.schedule_at(now, after)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle);
    }
}
