//! A fixed-capacity min-heap of deadline-ordered timer callbacks, one per
//! clock domain.
//!
//! Each entry fires `handler` once its deadline is reached. A periodic
//! entry is re-inserted immediately with `deadline += interval` rather than
//! recomputed from "now" — a run that's running late doesn't get extra time
//! back, it just fires the next tick sooner than a full interval away.

use planck_noalloc::vec::ArrayVec;
use vesper_core::ClockId;

/// Upper bound on timers live at once per clock domain.
pub const MAX_TIMERS: usize = 256;

/// An opaque deferred call invoked when a timer fires.
pub type TimerHandler = fn(ClockId, userdata: u64);

/// One entry in the timer heap.
#[derive(Clone, Copy)]
struct TimerEntry {
    deadline: u64,
    interval: Option<u64>,
    clock: ClockId,
    handler: TimerHandler,
    userdata: u64,
}

/// A min-heap of timer entries ordered by absolute deadline.
pub struct TimerHeap {
    entries: ArrayVec<TimerEntry, MAX_TIMERS>,
}

/// Errors the timer heap's `register` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The heap is already at [`MAX_TIMERS`] live entries.
    Full,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    /// Creates an empty timer heap.
    pub const fn new() -> Self {
        Self { entries: ArrayVec::new() }
    }

    /// Registers a one-shot timer firing `handler(clock, userdata)` at `deadline`.
    pub fn register_oneshot(
        &mut self,
        clock: ClockId,
        deadline: u64,
        handler: TimerHandler,
        userdata: u64,
    ) -> Result<(), TimerError> {
        self.push(TimerEntry { deadline, interval: None, clock, handler, userdata })
    }

    /// Registers a periodic timer, first firing at `first_deadline`, then
    /// every `interval` ticks after that.
    pub fn register_periodic(
        &mut self,
        clock: ClockId,
        first_deadline: u64,
        interval: u64,
        handler: TimerHandler,
        userdata: u64,
    ) -> Result<(), TimerError> {
        self.push(TimerEntry {
            deadline: first_deadline,
            interval: Some(interval),
            clock,
            handler,
            userdata,
        })
    }

    fn push(&mut self, entry: TimerEntry) -> Result<(), TimerError> {
        self.entries.try_push(entry).map_err(|_| TimerError::Full)?;
        let mut i = self.entries.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries.as_slice()[parent].deadline <= self.entries.as_slice()[i].deadline {
                break;
            }
            self.entries.as_mut_slice().swap(parent, i);
            i = parent;
        }
        Ok(())
    }

    fn pop_min(&mut self) -> Option<TimerEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.as_mut_slice().swap(0, last);
        let min = self.entries.pop().unwrap();
        let mut i = 0;
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            let slice = self.entries.as_slice();
            if left < slice.len() && slice[left].deadline < slice[smallest].deadline {
                smallest = left;
            }
            if right < slice.len() && slice[right].deadline < slice[smallest].deadline {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.entries.as_mut_slice().swap(i, smallest);
            i = smallest;
        }
        Some(min)
    }

    /// Returns the deadline of the next timer to fire, if any are registered.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.as_slice().first().map(|e| e.deadline)
    }

    /// Fires every timer whose deadline has passed as of `now`, re-inserting
    /// periodic entries with `deadline += interval`. Returns the number of
    /// handlers invoked.
    pub fn service(&mut self, now: u64) -> u32 {
        let mut fired = 0;
        while matches!(self.next_deadline(), Some(d) if d <= now) {
            let entry = self.pop_min().expect("next_deadline said Some");
            (entry.handler)(entry.clock, entry.userdata);
            fired += 1;
            if let Some(interval) = entry.interval {
                let _ = self.push(TimerEntry { deadline: entry.deadline + interval, ..entry });
            }
        }
        fired
    }

    /// Number of live timer entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clamps the delta until the next deadline into `[min, max]`, the bounds
/// the platform timer is willing to be reprogrammed to. A very-near or very
/// far deadline still gets the hardware timer armed at a sane granularity
/// rather than a near-zero or unbounded reload value.
pub fn clamp_timer_delta(delta: u64, min: u64, max: u64) -> u64 {
    delta.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);

    fn handler(_clock: ClockId, _userdata: u64) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut heap = TimerHeap::new();
        heap.register_oneshot(ClockId::MONOTONIC, 30, handler, 0).unwrap();
        heap.register_oneshot(ClockId::MONOTONIC, 10, handler, 0).unwrap();
        heap.register_oneshot(ClockId::MONOTONIC, 20, handler, 0).unwrap();
        assert_eq!(heap.next_deadline(), Some(10));
        heap.pop_min();
        assert_eq!(heap.next_deadline(), Some(20));
    }

    #[test]
    fn service_fires_all_expired_and_leaves_future_ones() {
        let mut heap = TimerHeap::new();
        heap.register_oneshot(ClockId::MONOTONIC, 10, handler, 0).unwrap();
        heap.register_oneshot(ClockId::MONOTONIC, 20, handler, 0).unwrap();
        heap.register_oneshot(ClockId::MONOTONIC, 1000, handler, 0).unwrap();
        let before = FIRE_COUNT.load(Ordering::SeqCst);
        let fired = heap.service(25);
        assert_eq!(fired, 2);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), before + 2);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn periodic_timer_reinserts_with_fixed_interval() {
        let mut heap = TimerHeap::new();
        heap.register_periodic(ClockId::MONOTONIC, 10, 5, handler, 0).unwrap();
        heap.service(10);
        assert_eq!(heap.next_deadline(), Some(15));
        heap.service(15);
        assert_eq!(heap.next_deadline(), Some(20));
    }

    #[test]
    fn clamp_keeps_delta_within_bounds() {
        assert_eq!(clamp_timer_delta(1, 100, 10_000), 100);
        assert_eq!(clamp_timer_delta(50_000, 100, 10_000), 10_000);
        assert_eq!(clamp_timer_delta(5000, 100, 10_000), 5000);
    }
}
