//! SMP bring-up: processor counting and Application Processor start.
//!
//! ACPI table parsing is out of scope for this kernel; [`MadtEntry`] is the
//! narrow contract the boot stage hands in after doing that parsing itself.

use vesper_core::CpuId;
use vesper_mm::Heap;

use crate::arch::x86_64::apic::LocalApic;

/// The MADT entry kinds this kernel cares about when counting processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MadtEntryKind {
    LocalApic,
    LocalX2Apic,
    Other,
}

/// A minimal view of one MADT entry: enough to decide whether it represents
/// a usable, enabled logical processor.
#[derive(Debug, Clone, Copy)]
pub struct MadtEntry {
    pub kind: MadtEntryKind,
    pub enabled: bool,
}

const ENABLED_FLAG_BIT: u32 = 1 << 0;

/// Counts entries of kind `LocalApic`/`LocalX2Apic` with the enabled flag
/// set. Defaults to 1 (just the boot processor) if `entries` is empty.
pub fn count_processors(entries: &[MadtEntry]) -> u32 {
    if entries.is_empty() {
        return 1;
    }
    let count = entries
        .iter()
        .filter(|e| matches!(e.kind, MadtEntryKind::LocalApic | MadtEntryKind::LocalX2Apic))
        .filter(|e| e.enabled)
        .count() as u32;
    count.max(1)
}

/// Checks whether a raw MADT processor-local-APIC flags field has the
/// enabled bit set, per the ACPI spec's `Local APIC Flags` field layout.
pub fn madt_flags_enabled(flags: u32) -> bool {
    flags & ENABLED_FLAG_BIT != 0
}

/// Starts one Application Processor and returns once it has begun running
/// the trampoline at the address `start_secondary_cores` handed it.
///
/// Implementations wrap whatever bootloader or firmware mechanism is
/// available (Limine's `goto_address`, an INIT-SIPI-SIPI sequence written
/// directly to the LAPIC, ...).
pub trait ApStarter {
    /// # Safety
    /// `entry_phys` must point at a valid AP trampoline built for this
    /// platform's real-mode or protected-mode entry convention.
    unsafe fn start_cpu(&self, cpu_index: u32, entry_phys: u64);
}

const TRAMPOLINE_SIZE: u64 = 0x1000;

/// Allocates a trampoline page, starts every Application Processor found in
/// `present_processors` (`[1, present_processors)`, CPU 0 is the boot
/// processor already running), then frees the trampoline.
///
/// # Safety
/// `entry_phys` must be the physical address of a trampoline already
/// written into the page this function allocates and frees; the caller is
/// responsible for writing it there before calling this function, and for
/// ensuring every AP has finished reading it before the page is freed.
pub unsafe fn start_secondary_cores<H: Heap>(
    heap: &H,
    present_processors: u32,
    entry_phys: u64,
    starter: &impl ApStarter,
) {
    let trampoline = match heap.alloc(TRAMPOLINE_SIZE) {
        Some(addr) => addr,
        None => return,
    };
    for cpu_index in 1..present_processors {
        unsafe {
            starter.start_cpu(cpu_index, entry_phys);
        }
    }
    heap.dealloc(trampoline, TRAMPOLINE_SIZE);
}

/// Default MXCSR value: all exception masks set, round-to-nearest, no
/// exceptions flagged.
pub const MXCSR_DEFAULT: u32 = 0x1F80;

/// Resets MXCSR to [`MXCSR_DEFAULT`] on the calling CPU.
pub fn reset_mxcsr() {
    unsafe {
        core::arch::asm!("ldmxcsr [{0}]", in(reg) &MXCSR_DEFAULT, options(nostack));
    }
}

/// Runs on each Application Processor after the trampoline hands off to Rust
/// code: resets MXCSR, enables this CPU's local APIC, then joins the run
/// loop the same way the boot processor does in
/// [`crate::boot::kernel_init`]. Never returns.
///
/// # Safety
/// `apic` must be this CPU's own local APIC, MMIO-mapped and otherwise
/// untouched since the trampoline finished its real-mode/protected-mode
/// setup; `cpu_index` must match the `CpuId` this CPU was allocated in
/// [`crate::context::GlobalContext`].
pub unsafe fn new_cpu(cpu_index: u32, apic: &LocalApic) -> ! {
    reset_mxcsr();
    apic.enable(crate::platform::SPURIOUS_VECTOR);

    let cpu_id = CpuId::new(cpu_index);
    let mut platform = crate::platform::KernelPlatform::new(cpu_id, apic);
    let mut current_thread = None;
    loop {
        let ctx = crate::context::get();
        vesper_sched::runloop_internal(
            ctx.cpu(cpu_id),
            current_thread,
            &ctx.runqueue,
            &ctx.bhqueue,
            &ctx.idle,
            &ctx.cpus,
            &mut platform,
        );
        current_thread = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_when_madt_absent() {
        assert_eq!(count_processors(&[]), 1);
    }

    #[test]
    fn counts_only_enabled_lapic_entries() {
        let entries = [
            MadtEntry { kind: MadtEntryKind::LocalApic, enabled: true },
            MadtEntry { kind: MadtEntryKind::LocalApic, enabled: false },
            MadtEntry { kind: MadtEntryKind::LocalX2Apic, enabled: true },
            MadtEntry { kind: MadtEntryKind::Other, enabled: true },
        ];
        assert_eq!(count_processors(&entries), 2);
    }

    #[test]
    fn madt_flags_enabled_checks_low_bit() {
        assert!(madt_flags_enabled(0b1));
        assert!(!madt_flags_enabled(0b0));
    }
}
