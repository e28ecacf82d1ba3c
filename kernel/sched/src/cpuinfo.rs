//! Per-CPU scheduling state and the idle bitmap used for work-stealing.

use crate::queue::BoundedQueue;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use vesper_core::CpuId;

/// Upper bound on the number of CPUs this kernel build supports. Sized so
/// the idle bitmap fits in a single `u64`; a larger machine would need a
/// wider bitmap type, which is out of scope for this build.
pub const MAX_CPUS: usize = 64;

/// The state a CPU's run loop is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    /// The CPU has not been brought up yet.
    NotPresent = 0,
    /// The CPU is parked in the run loop with no runnable thread.
    Idle = 1,
    /// The CPU is executing kernel code (inside `runloop_internal` or a thunk).
    Kernel = 2,
    /// The CPU is servicing an interrupt.
    Interrupt = 3,
    /// The CPU is executing a scheduled user thread.
    User = 4,
}

impl CpuState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CpuState::NotPresent,
            1 => CpuState::Idle,
            2 => CpuState::Kernel,
            3 => CpuState::Interrupt,
            _ => CpuState::User,
        }
    }
}

/// A handle to a runnable (or suspended) user thread.
///
/// Modeled as the same deferred-call shape queues already move around:
/// dispatching a thread means invoking this closure to completion.
/// Architecture-specific register-context save/restore (the "coroutine"
/// half of spec's thread model) is `vesper-kernel`'s concern, layered on
/// top of this handle rather than inside it — the scheduler only ever
/// moves the handle between queues, never inspects it.
pub type ThreadHandle = crate::queue::Thunk;

/// Per-CPU scheduling state, one instance per entry in a `[CpuInfo; MAX_CPUS]`
/// array indexed by [`CpuId`].
pub struct CpuInfo {
    id: CpuId,
    state: AtomicU8,
    /// Per-CPU queue of runnable threads waiting specifically for this CPU
    /// (affinity-pinned work, or threads donated directly by another CPU).
    pub thread_queue: BoundedQueue,
    have_kernel_lock: AtomicU8,
    last_timer_update: AtomicU64,
}

impl CpuInfo {
    /// Creates a not-present `CpuInfo` for `id`. Brought to `Idle` once the
    /// CPU actually starts running its run loop.
    pub fn new(id: CpuId) -> Self {
        Self {
            id,
            state: AtomicU8::new(CpuState::NotPresent as u8),
            thread_queue: BoundedQueue::new(crate::queue::DEFAULT_CAPACITY),
            have_kernel_lock: AtomicU8::new(0),
            last_timer_update: AtomicU64::new(0),
        }
    }

    /// This CPU's id.
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Current run-loop state.
    pub fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Sets the run-loop state.
    pub fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns `true` if this CPU currently holds the kernel lock.
    pub fn has_kernel_lock(&self) -> bool {
        self.have_kernel_lock.load(Ordering::Acquire) != 0
    }

    /// Records whether this CPU currently holds the kernel lock.
    pub fn set_has_kernel_lock(&self, held: bool) {
        self.have_kernel_lock.store(held as u8, Ordering::Release);
    }

    /// The tick value as of this CPU's last timer service.
    pub fn last_timer_update(&self) -> u64 {
        self.last_timer_update.load(Ordering::Relaxed)
    }

    /// Records the tick value at this CPU's last timer service.
    pub fn set_last_timer_update(&self, tick: u64) {
        self.last_timer_update.store(tick, Ordering::Relaxed);
    }
}

/// A bitmap of which CPUs are currently idle, used to prefer waking an idle
/// CPU over interrupting a busy one.
pub struct IdleBitmap {
    bits: AtomicU64,
}

impl Default for IdleBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleBitmap {
    /// Creates a bitmap with every CPU marked busy.
    pub const fn new() -> Self {
        Self { bits: AtomicU64::new(0) }
    }

    /// Marks `cpu` idle.
    pub fn set_idle(&self, cpu: CpuId) {
        self.bits.fetch_or(1 << cpu.as_usize(), Ordering::AcqRel);
    }

    /// Marks `cpu` busy.
    pub fn clear_idle(&self, cpu: CpuId) {
        self.bits.fetch_and(!(1 << cpu.as_usize()), Ordering::AcqRel);
    }

    /// Returns `true` if `cpu` is currently marked idle.
    pub fn is_idle(&self, cpu: CpuId) -> bool {
        self.bits.load(Ordering::Acquire) & (1 << cpu.as_usize()) != 0
    }

    /// Returns the id of any currently-idle CPU, or `None` if all are busy.
    pub fn any_idle(&self) -> Option<CpuId> {
        let bits = self.bits.load(Ordering::Acquire);
        if bits == 0 {
            None
        } else {
            Some(CpuId::new(bits.trailing_zeros()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_atomic() {
        let info = CpuInfo::new(CpuId::new(0));
        assert_eq!(info.state(), CpuState::NotPresent);
        info.set_state(CpuState::Idle);
        assert_eq!(info.state(), CpuState::Idle);
    }

    #[test]
    fn idle_bitmap_tracks_set_and_clear() {
        let bitmap = IdleBitmap::new();
        assert!(bitmap.any_idle().is_none());
        bitmap.set_idle(CpuId::new(3));
        assert!(bitmap.is_idle(CpuId::new(3)));
        assert_eq!(bitmap.any_idle(), Some(CpuId::new(3)));
        bitmap.clear_idle(CpuId::new(3));
        assert!(!bitmap.is_idle(CpuId::new(3)));
        assert!(bitmap.any_idle().is_none());
    }

    #[test]
    fn any_idle_prefers_lowest_set_bit() {
        let bitmap = IdleBitmap::new();
        bitmap.set_idle(CpuId::new(5));
        bitmap.set_idle(CpuId::new(2));
        assert_eq!(bitmap.any_idle(), Some(CpuId::new(2)));
    }
}
