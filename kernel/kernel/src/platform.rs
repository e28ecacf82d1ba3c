//! Wires [`vesper_sched::RunloopPlatform`] against this kernel's timer
//! heap, kernel lock, local APIC, and TLB batching — the piece the scheduler
//! crate deliberately leaves abstract so its dispatch logic stays
//! host-testable.

use vesper_core::CpuId;
use vesper_mm::mmu::TlbShootdownSet;
use vesper_sched::cpuinfo::ThreadHandle;
use vesper_sched::RunloopPlatform;

use crate::arch::x86_64::apic::LocalApic;
use crate::arch::x86_64::{clock, paging};
use crate::config::{RUNLOOP_TIMER_MAX, RUNLOOP_TIMER_MIN};
use crate::context::{self, LockedSchedulerState};
use crate::sync::KernelLockGuard;

/// Local APIC vector the periodic/one-shot timer fires on.
pub const TIMER_VECTOR: u8 = 0x30;
/// Local APIC vector reserved purely to break a parked CPU out of `hlt`.
pub const WAKEUP_VECTOR: u8 = 0x31;
/// Vector the local APIC reports spurious interrupts on.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Rough ticks-per-reprogram-unit; the local APIC's timer counts down in
/// bus clock ticks, not TSC ticks, so this is a deliberately coarse
/// approximation good enough to keep the quantum in the right ballpark
/// without a full APIC/TSC calibration pass.
const APIC_TICKS_PER_TSC_TICK: u64 = 1;

/// One CPU's [`RunloopPlatform`] implementation, built fresh at the top of
/// every pass through `runloop_internal`.
pub struct KernelPlatform<'a> {
    cpu: CpuId,
    apic: &'a LocalApic,
    shootdown: TlbShootdownSet,
    guard: Option<KernelLockGuard<'static, LockedSchedulerState>>,
}

impl<'a> KernelPlatform<'a> {
    /// Creates a platform view for `cpu`, driving timer hardware through
    /// `apic`.
    pub fn new(cpu: CpuId, apic: &'a LocalApic) -> Self {
        Self {
            cpu,
            apic,
            shootdown: TlbShootdownSet::new(),
            guard: None,
        }
    }

    fn now(&self) -> u64 {
        clock::read_tsc()
    }
}

impl RunloopPlatform for KernelPlatform<'_> {
    fn pause_thread(&mut self, _thread: ThreadHandle) {
        // Saving a user thread's register context is architecture-specific
        // machinery this kernel's run loop seam doesn't yet own; threads
        // are opaque handles at this layer (see `vesper_sched::ThreadHandle`).
    }

    fn disable_interrupts(&mut self) {
        crate::arch::disable_interrupts();
    }

    fn flush_tlb(&mut self) {
        self.shootdown.flush(paging::invlpg, paging::flush_all);
    }

    fn try_kernel_lock(&mut self) -> bool {
        match context::get().kernel_lock.try_lock() {
            Some(guard) => {
                self.guard = Some(guard);
                true
            }
            None => false,
        }
    }

    fn unlock_kernel_lock(&mut self) {
        self.guard = None;
    }

    fn timer_service(&mut self) -> u32 {
        let now = self.now();
        match self.guard.as_mut() {
            Some(guard) => guard.timers.service(now),
            None => 0,
        }
    }

    fn mm_service(&mut self) {
        // No background balancing/trim policy is implemented: the hooks
        // above (kernel lock held, heaps reachable via `context::heaps()`)
        // are where one would run.
    }

    fn next_timer_deadline(&mut self) -> Option<u64> {
        self.guard.as_ref().and_then(|guard| guard.timers.next_deadline())
    }

    fn reprogram_timer(&mut self, deadline: u64) {
        let now = self.now();
        let delta = deadline.saturating_sub(now);
        let clamped = vesper_sched::timer::clamp_timer_delta(delta, RUNLOOP_TIMER_MIN, RUNLOOP_TIMER_MAX);
        let cpu = context::get().cpu(self.cpu);
        cpu.set_last_timer_update(now + clamped);
        let initial_count = (clamped / APIC_TICKS_PER_TSC_TICK).clamp(1, u32::MAX as u64) as u32;
        self.apic.start_timer_oneshot(TIMER_VECTOR, initial_count, 1);
    }

    fn run_thread(&mut self, thread: ThreadHandle) {
        // No architecture-specific context switch exists yet (see
        // `pause_thread`), so dispatch runs the thread's entry closure to
        // completion on the run loop's own stack rather than resuming a
        // saved register context. This still satisfies the "executed
        // exactly once" contract the scheduler's dispatch decision relies
        // on; only the coroutine-style pause/resume half is deferred.
        thread();
    }

    fn idle_and_wait_for_interrupt(&mut self) {
        crate::arch::enable_and_hlt();
    }

    fn ensure_quantum_deadline(&mut self) {
        let now = self.now();
        let cpu = context::get().cpu(self.cpu);
        let scheduled = cpu.last_timer_update();
        if scheduled > now && scheduled - now <= RUNLOOP_TIMER_MAX {
            return;
        }
        let deadline = now + RUNLOOP_TIMER_MAX;
        cpu.set_last_timer_update(deadline);
        let initial_count = (RUNLOOP_TIMER_MAX / APIC_TICKS_PER_TSC_TICK).clamp(1, u32::MAX as u64) as u32;
        self.apic.start_timer_oneshot(TIMER_VECTOR, initial_count, 1);
    }

    fn wakeup_cpu(&mut self, cpu: CpuId) {
        // This kernel maps logical CPU ids directly onto APIC ids (see
        // `send_shutdown_ipi_all`); every id the scheduler hands back came
        // from `all_cpus`, which only contains CPUs brought up through
        // `smp::start_secondary_cores`.
        send_wakeup_ipi(self.apic, cpu.as_u32() as u8);
    }
}

/// Registers an ignored interrupt handler vector whose only purpose is to
/// break a parked CPU out of `hlt` — see [`WAKEUP_VECTOR`].
pub fn send_wakeup_ipi(apic: &LocalApic, target_apic_id: u8) {
    // SAFETY: the wakeup vector is registered with a no-op handler; firing
    // it at any online APIC ID is always safe.
    unsafe {
        apic.send_ipi(target_apic_id, WAKEUP_VECTOR);
    }
}

/// Broadcasts the shutdown vector to every other online CPU, each of which
/// invokes [`crate::vmexit`]'s halt path on receipt.
pub fn send_shutdown_ipi_all(apic: &LocalApic, present_processors: u32, this_apic_id: u8) {
    for target in 0..present_processors as u8 {
        if target == this_apic_id {
            continue;
        }
        // SAFETY: every id in `0..present_processors` was brought up by
        // `smp::start_secondary_cores` before this can be called.
        unsafe {
            apic.send_ipi(target, crate::vmexit::SHUTDOWN_VECTOR);
        }
    }
}
