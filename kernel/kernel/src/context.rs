//! The process-wide singletons: kernel heaps, the global run queue and
//! bottom-half queue, the idle bitmap, the kernel lock, and the per-CPU
//! array. Initialized in strict order during boot and never torn down —
//! every CPU reaches the same instances through the accessors here rather
//! than threading them through every call site by hand.

use core::sync::atomic::{AtomicU32, Ordering};

use vesper_core::sync::OnceCell;
use vesper_core::{CpuId, PhysAddr};
use vesper_mm::RegionTable;
use vesper_sched::{BoundedQueue, CpuInfo, IdleBitmap, TimerHeap, DEFAULT_CAPACITY, MAX_CPUS};

use crate::heaps::{self, KernelHeaps};
use crate::sync::KernelLock;

/// State the kernel lock actually protects: the timer heap, and nothing
/// else directly — memory-manager service and global-runqueue draining are
/// gated by holding the same lock (via [`GlobalContext::kernel_lock`]) but
/// operate on `runqueue` and the heaps aggregate, not on data stored here.
pub struct LockedSchedulerState {
    /// The system's single timer heap, serviced once per pass by whichever
    /// CPU holds the kernel lock.
    pub timers: TimerHeap,
}

/// Everything global, bundled into one struct built exactly once at boot.
pub struct GlobalContext {
    /// Per-CPU scheduling state, indexed by [`CpuId`].
    pub cpus: [CpuInfo; MAX_CPUS],
    /// The system-wide run queue. Any CPU may push; draining it requires
    /// the kernel lock.
    pub runqueue: BoundedQueue,
    /// The bottom-half queue. Any CPU may push; any CPU drains its own pass
    /// without taking the kernel lock.
    pub bhqueue: BoundedQueue,
    /// Tracks which CPUs are currently idle, for work-stealing wakeups.
    pub idle: IdleBitmap,
    /// Guards the timer heap and gates consumption of `runqueue` and
    /// memory-manager service.
    pub kernel_lock: KernelLock<LockedSchedulerState>,
    total_processors: AtomicU32,
}

impl GlobalContext {
    fn new() -> Self {
        Self {
            cpus: core::array::from_fn(|i| CpuInfo::new(CpuId::new(i as u32))),
            runqueue: BoundedQueue::new(DEFAULT_CAPACITY),
            bhqueue: BoundedQueue::new(DEFAULT_CAPACITY),
            idle: IdleBitmap::new(),
            kernel_lock: KernelLock::new(LockedSchedulerState { timers: TimerHeap::new() }),
            total_processors: AtomicU32::new(1),
        }
    }

    /// The per-CPU state for `id`.
    pub fn cpu(&self, id: CpuId) -> &CpuInfo {
        &self.cpus[id.as_usize()]
    }

    /// The number of processors this boot brought up (BSP included).
    pub fn total_processors(&self) -> u32 {
        self.total_processors.load(Ordering::Acquire)
    }

    /// Records the number of processors brought up. Called once, from the
    /// BSP, after `start_secondary_cores` returns.
    pub fn set_total_processors(&self, count: u32) {
        self.total_processors.store(count, Ordering::Release);
    }
}

static CONTEXT: OnceCell<GlobalContext> = OnceCell::new();

/// Builds the global context. Must be called exactly once, by the BSP,
/// before any CPU (including the BSP itself) reaches the run loop.
pub fn init() {
    if CONTEXT.set(GlobalContext::new()).is_err() {
        panic!("context::init called more than once");
    }
}

/// Returns the global context.
///
/// # Panics
/// Panics if [`init`] has not run yet.
pub fn get() -> &'static GlobalContext {
    CONTEXT.get_or_panic()
}

/// Builds the kernel heaps aggregate and installs it as the global instance
/// every CPU reaches through [`heaps`]. Must run once, after the region
/// table is final (after reclaim) and before any allocation.
///
/// # Safety
/// See [`crate::heaps::init_kernel_heaps`].
pub unsafe fn init_heaps(regions: &RegionTable, hhdm_offset: u64, page_table_root: PhysAddr) {
    let built = unsafe { heaps::init_kernel_heaps(regions, hhdm_offset, page_table_root) };
    if heaps::KERNEL_HEAPS.set(built).is_err() {
        panic!("context::init_heaps called more than once");
    }
}

/// Returns the global kernel heaps aggregate.
///
/// # Panics
/// Panics if [`init_heaps`] has not run yet.
pub fn heaps() -> &'static KernelHeaps {
    heaps::KERNEL_HEAPS.get_or_panic()
}
