//! The cooperative run-loop state machine and cross-CPU work stealing.
//!
//! `runloop_internal` is deliberately pure with respect to the platform:
//! interrupt masking, TLB flushing, and actually resuming a thread are all
//! callbacks the caller supplies, so the dispatch logic itself — drain
//! order, kernel-lock gating, steal search order — is host-testable.

use crate::cpuinfo::{CpuInfo, CpuState, IdleBitmap, ThreadHandle};
use crate::queue::BoundedQueue;
use vesper_core::CpuId;

/// Platform hooks `runloop_internal` drives through. A real kernel
/// implements this against interrupts, the TLB, and the timer hardware; a
/// test implements it against counters.
pub trait RunloopPlatform {
    /// Pauses `thread`, saving its context so it can be resumed later.
    fn pause_thread(&mut self, thread: ThreadHandle);
    /// Disables interrupt delivery on the calling CPU.
    fn disable_interrupts(&mut self);
    /// Flushes any TLB entries invalidated since the last flush.
    fn flush_tlb(&mut self);
    /// Attempts to acquire the global kernel lock without blocking.
    fn try_kernel_lock(&mut self) -> bool;
    /// Releases the global kernel lock.
    fn unlock_kernel_lock(&mut self);
    /// Services due timers, returning the number fired.
    fn timer_service(&mut self) -> u32;
    /// Services pending memory-manager work (deferred unmaps, reclaim).
    fn mm_service(&mut self);
    /// Returns the deadline the platform timer should next be armed for, if
    /// any timer is registered.
    fn next_timer_deadline(&mut self) -> Option<u64>;
    /// Reprograms the platform timer to fire at or before `deadline`.
    fn reprogram_timer(&mut self, deadline: u64);
    /// Resumes `thread`, never returning to the caller directly — control
    /// comes back through a future call to `runloop_internal` once the
    /// thread yields or is preempted.
    fn run_thread(&mut self, thread: ThreadHandle);
    /// Re-enables interrupts and halts until the next interrupt arrives.
    fn idle_and_wait_for_interrupt(&mut self);
    /// Sends the wake-up IPI to `cpu`, breaking it out of
    /// `idle_and_wait_for_interrupt` if it is currently parked there.
    fn wakeup_cpu(&mut self, cpu: CpuId);
    /// Ensures this CPU's platform timer is armed no further out than the
    /// scheduler quantum. Called only when step 4 didn't already reprogram
    /// the timer this pass and more than one CPU is present, so a CPU that
    /// keeps finding local work still gets pulled back into the run loop
    /// instead of monopolizing it.
    fn ensure_quantum_deadline(&mut self);
}

/// Runs one pass of the cooperative scheduler for `cpu`, given `global_queue`
/// (the system-wide run queue, gated by the kernel lock), `bhqueue` (the
/// lock-free bottom-half queue only this CPU drains), `idle`, and `all_cpus`
/// (every CPU's state, for work-stealing).
///
/// Mirrors the boot-time-to-steady-state structure: pause the current
/// thread, enter kernel mode, drain bottom halves unconditionally, then
/// opportunistically take the kernel lock to service timers and the global
/// queue, then dispatch — from this CPU's own queue, by stealing from a
/// peer, or by idling.
pub fn runloop_internal(
    cpu: &CpuInfo,
    current_thread: Option<ThreadHandle>,
    global_queue: &BoundedQueue,
    bhqueue: &BoundedQueue,
    idle: &IdleBitmap,
    all_cpus: &[CpuInfo],
    platform: &mut impl RunloopPlatform,
) {
    if let Some(thread) = current_thread {
        platform.pause_thread(thread);
    }
    platform.disable_interrupts();
    cpu.set_state(CpuState::Kernel);
    platform.flush_tlb();

    bhqueue.drain_and_run();

    let mut timer_updated = false;
    if platform.try_kernel_lock() {
        cpu.set_has_kernel_lock(true);
        platform.timer_service();
        global_queue.drain_and_run();
        platform.mm_service();
        if let Some(deadline) = platform.next_timer_deadline() {
            platform.reprogram_timer(deadline);
            timer_updated = true;
        }
        cpu.set_has_kernel_lock(false);
        platform.unlock_kernel_lock();
    }

    // Step 6: a dispatched thread runs without re-entering this loop until
    // it yields, so if step 4 didn't already bound this CPU's next timer
    // interrupt, make sure one still fires within the scheduler quantum —
    // otherwise a CPU that keeps finding local work could hold the
    // platform timer idle indefinitely on a multi-CPU system.
    let needs_quantum_fallback = !timer_updated && all_cpus.len() > 1;

    if let Some(thread) = dequeue_own(cpu) {
        idle.clear_idle(cpu.id());
        cpu.set_state(CpuState::User);
        wake_and_donate_to_idle_peers(cpu, all_cpus, idle, platform);
        if needs_quantum_fallback {
            platform.ensure_quantum_deadline();
        }
        platform.run_thread(thread);
        return;
    }

    if let Some((victim, thread)) = steal_from_peers(cpu.id(), all_cpus, idle) {
        if idle.is_idle(victim) {
            // The never-steal-the-only-thread rule guarantees the victim
            // still has work left; if it's parked, wake it to pick that up.
            platform.wakeup_cpu(victim);
        }
        idle.clear_idle(cpu.id());
        cpu.set_state(CpuState::User);
        if needs_quantum_fallback {
            platform.ensure_quantum_deadline();
        }
        platform.run_thread(thread);
        return;
    }

    idle.set_idle(cpu.id());
    cpu.set_state(CpuState::Idle);
    platform.idle_and_wait_for_interrupt();
}

fn dequeue_own(cpu: &CpuInfo) -> Option<ThreadHandle> {
    cpu.thread_queue.pop()
}

/// For a CPU that just dispatched one of its own threads: wakes any idle
/// peer whose queue already has work waiting (covers the case where a
/// donation raced ahead of the wake-up), and hands one extra local thread
/// to each idle peer whose queue is empty, waking it too. Mirrors spec's
/// "if non-empty: wake idle peers with queued work; additionally donate one
/// local thread per idle peer" branch of the thread-scheduling step.
fn wake_and_donate_to_idle_peers(
    cpu: &CpuInfo,
    all_cpus: &[CpuInfo],
    idle: &IdleBitmap,
    platform: &mut impl RunloopPlatform,
) {
    for peer in all_cpus {
        if peer.id() == cpu.id() || !idle.is_idle(peer.id()) {
            continue;
        }
        if !peer.thread_queue.is_empty() {
            platform.wakeup_cpu(peer.id());
            continue;
        }
        if let Some(extra) = cpu.thread_queue.pop() {
            let _ = peer.thread_queue.push(extra);
            platform.wakeup_cpu(peer.id());
        }
    }
}

/// Searches for a thread to steal starting at `id + 1`, wrapping around
/// through `0..id`, so no CPU is ever searched twice and the search order
/// rotates rather than always favoring CPU 0. Idle CPUs are searched first
/// (stealing from a parked CPU is free; stealing from a busy one costs it
/// a cache-warm run), then CPUs currently in `User` state.
///
/// Never steals a victim's only runnable thread: leaving at least one
/// behind avoids two CPUs bouncing the same thread back and forth when work
/// is scarce.
fn steal_from_peers(id: CpuId, all_cpus: &[CpuInfo], idle: &IdleBitmap) -> Option<(CpuId, ThreadHandle)> {
    let total = all_cpus.len() as u32;
    if total == 0 {
        return None;
    }
    steal_pass(id, total, all_cpus, |victim| idle.is_idle(victim.id()))
        .or_else(|| steal_pass(id, total, all_cpus, |victim| victim.state() == CpuState::User))
}

fn steal_pass(
    id: CpuId,
    total: u32,
    all_cpus: &[CpuInfo],
    eligible: impl Fn(&CpuInfo) -> bool,
) -> Option<(CpuId, ThreadHandle)> {
    let search_order = (id.as_u32() + 1..total).chain(0..id.as_u32());
    for candidate in search_order {
        let victim = &all_cpus[candidate as usize];
        if !eligible(victim) || victim.thread_queue.len() <= 1 {
            continue;
        }
        if let Some(thunk) = victim.thread_queue.pop() {
            return Some((CpuId::new(candidate), thunk));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuinfo::CpuInfo;
    use alloc::boxed::Box;

    struct CountingPlatform {
        kernel_lock_available: bool,
        timer_fired: u32,
        ran_thread: Option<ThreadHandle>,
        idled: bool,
        woken: alloc::vec::Vec<CpuId>,
        next_deadline: Option<u64>,
        quantum_armed: u32,
    }

    impl RunloopPlatform for CountingPlatform {
        fn pause_thread(&mut self, _thread: ThreadHandle) {}
        fn disable_interrupts(&mut self) {}
        fn flush_tlb(&mut self) {}
        fn try_kernel_lock(&mut self) -> bool {
            self.kernel_lock_available
        }
        fn unlock_kernel_lock(&mut self) {}
        fn timer_service(&mut self) -> u32 {
            self.timer_fired
        }
        fn mm_service(&mut self) {}
        fn next_timer_deadline(&mut self) -> Option<u64> {
            self.next_deadline
        }
        fn reprogram_timer(&mut self, _deadline: u64) {}
        fn run_thread(&mut self, thread: ThreadHandle) {
            self.ran_thread = Some(thread);
        }
        fn idle_and_wait_for_interrupt(&mut self) {
            self.idled = true;
        }
        fn wakeup_cpu(&mut self, cpu: CpuId) {
            self.woken.push(cpu);
        }
        fn ensure_quantum_deadline(&mut self) {
            self.quantum_armed += 1;
        }
    }

    impl CountingPlatform {
        fn new(kernel_lock_available: bool) -> Self {
            Self {
                kernel_lock_available,
                timer_fired: 0,
                ran_thread: None,
                idled: false,
                woken: alloc::vec::Vec::new(),
                next_deadline: None,
                quantum_armed: 0,
            }
        }
    }

    #[test]
    fn idles_when_nothing_runnable_and_no_peers() {
        let cpu = CpuInfo::new(CpuId::new(0));
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0))];
        let mut platform = CountingPlatform::new(true);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.idled);
        assert!(idle.is_idle(CpuId::new(0)));
    }

    #[test]
    fn runs_own_queued_thread_before_stealing() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0))];
        let mut platform = CountingPlatform::new(true);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.ran_thread.is_some());
        assert!(!platform.idled);
    }

    #[test]
    fn steal_prefers_idle_peer_in_search_order() {
        let this = CpuInfo::new(CpuId::new(1));
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[0].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[0].thread_queue.push(Box::new(|| {})).ok().unwrap();
        let idle = IdleBitmap::new();
        idle.set_idle(CpuId::new(0));
        let stolen = steal_from_peers(this.id(), &all, &idle);
        assert_eq!(stolen.map(|(victim, _)| victim), Some(CpuId::new(0)));
    }

    #[test]
    fn steal_falls_back_to_busy_user_peer_when_no_idle_peer_qualifies() {
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[0].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[0].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[0].set_state(CpuState::User);
        let idle = IdleBitmap::new();
        // CPU 0 is not idle, but it's in User state with spare work.
        let stolen = steal_from_peers(CpuId::new(1), &all, &idle);
        assert_eq!(stolen.map(|(victim, _)| victim), Some(CpuId::new(0)));
    }

    #[test]
    fn never_steals_a_victims_only_thread() {
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[0].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[0].set_state(CpuState::User);
        let idle = IdleBitmap::new();
        let stolen = steal_from_peers(CpuId::new(1), &all, &idle);
        assert!(stolen.is_none());
    }

    #[test]
    fn stealing_from_an_idle_victim_wakes_it() {
        let cpu = CpuInfo::new(CpuId::new(0));
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[1].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[1].thread_queue.push(Box::new(|| {})).ok().unwrap();
        idle.set_idle(CpuId::new(1));
        let mut platform = CountingPlatform::new(true);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.ran_thread.is_some());
        assert_eq!(platform.woken, alloc::vec![CpuId::new(1)]);
    }

    #[test]
    fn dispatching_own_thread_donates_one_to_each_empty_idle_peer() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        idle.set_idle(CpuId::new(1));
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        let mut platform = CountingPlatform::new(true);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.ran_thread.is_some());
        assert_eq!(platform.woken, alloc::vec![CpuId::new(1)]);
        assert_eq!(all[1].thread_queue.len(), 1);
    }

    #[test]
    fn dispatching_own_thread_wakes_idle_peer_that_already_has_work() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        idle.set_idle(CpuId::new(1));
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[1].thread_queue.push(Box::new(|| {})).ok().unwrap();
        let mut platform = CountingPlatform::new(true);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert_eq!(platform.woken, alloc::vec![CpuId::new(1)]);
        // Already had work queued, so nothing extra was donated.
        assert_eq!(all[1].thread_queue.len(), 1);
    }

    #[test]
    fn quantum_fallback_arms_when_step_four_left_timer_unset_on_multi_cpu() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        let mut platform = CountingPlatform::new(true);
        platform.next_deadline = None;
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.ran_thread.is_some());
        assert_eq!(platform.quantum_armed, 1);
    }

    #[test]
    fn quantum_fallback_does_not_arm_when_step_four_reprogrammed_the_timer() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        let mut platform = CountingPlatform::new(true);
        platform.next_deadline = Some(1000);
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert_eq!(platform.quantum_armed, 0);
    }

    #[test]
    fn quantum_fallback_does_not_arm_on_a_single_cpu_system() {
        let cpu = CpuInfo::new(CpuId::new(0));
        cpu.thread_queue.push(Box::new(|| {})).ok().unwrap();
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0))];
        let mut platform = CountingPlatform::new(true);
        platform.next_deadline = None;
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert_eq!(platform.quantum_armed, 0);
    }

    #[test]
    fn quantum_fallback_arms_on_steal_dispatch_too() {
        let cpu = CpuInfo::new(CpuId::new(0));
        let global = BoundedQueue::new(4);
        let bh = BoundedQueue::new(4);
        let idle = IdleBitmap::new();
        let all = [CpuInfo::new(CpuId::new(0)), CpuInfo::new(CpuId::new(1))];
        all[1].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[1].thread_queue.push(Box::new(|| {})).ok().unwrap();
        all[1].set_state(CpuState::User);
        let mut platform = CountingPlatform::new(true);
        platform.next_deadline = None;
        runloop_internal(&cpu, None, &global, &bh, &idle, &all, &mut platform);
        assert!(platform.ran_thread.is_some());
        assert_eq!(platform.quantum_armed, 1);
    }
}
