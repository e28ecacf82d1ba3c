//! Boot sequence: staged handoff (the loader already built the page tables
//! and region table) and direct hypervisor handoff (raw real-mode boot
//! params, parsed by hand).

use vesper_core::{PhysAddr, VirtAddr};
use vesper_mm::{Region, RegionKind, RegionTable};

use crate::cmdline;
use crate::smp::{ApStarter, MadtEntry};

/// What a loader hands the kernel before `kernel_init` runs, abstracted so
/// the rest of boot is written once against the trait instead of twice per
/// handoff mode.
///
/// The loader has already done everything specific to how it found memory
/// and the kernel image: the region table is final, a page-table mapper is
/// live, and [`crate::context::init_heaps`] has already installed the
/// kernel heaps aggregate by the time `kernel_init` is reached. This trait
/// hands over only what's left: processor topology, the command line, and
/// the two hardware handles (local APIC, AP trampoline) `kernel_init` needs
/// to bring the rest of the system up.
pub trait BootInfo {
    /// The memory map as the loader (or direct e820 parse) built it.
    fn regions(&self) -> &RegionTable;
    /// MADT processor entries, already parsed by the loader/firmware layer.
    fn madt_entries(&self) -> &[MadtEntry];
    /// The raw kernel command line, space-delimited tokens.
    fn cmdline(&self) -> &str;
    /// Virtual address the local APIC's MMIO register block is mapped at.
    fn local_apic_virt_base(&self) -> VirtAddr;
    /// Physical address of the real-mode AP trampoline, already written by
    /// the loader into a page below 1 MiB.
    fn ap_trampoline_entry(&self) -> u64;
    /// The mechanism this platform starts Application Processors through.
    fn ap_starter(&self) -> &dyn ApStarter;
}

/// Byte offsets into the Linux/x86 boot protocol's zero-page boot params,
/// used only on the direct hypervisor handoff path.
mod boot_params_offsets {
    pub const BOOT_FLAG: usize = 0x01FE;
    pub const HDR_MAGIC: usize = 0x0202;
    pub const CMDLINE_PTR: usize = 0x0228;
    pub const CMDLINE_SIZE: usize = 0x0238;
    pub const E820_COUNT: usize = 0x01E8;
    pub const E820_TABLE: usize = 0x02D0;
}

const BOOT_FLAG_VALUE: u16 = 0xAA55;
const HDR_MAGIC_VALUE: u32 = 0x5372_6448;

/// One raw e820 entry as laid out by the boot protocol: base, length, type.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct E820Entry {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
}

/// Reads a `T` out of the boot params blob at byte offset `offset`.
///
/// # Safety
/// `params` must point at a valid boot-params blob at least
/// `offset + size_of::<T>()` bytes long.
unsafe fn read_at<T: Copy>(params: *const u8, offset: usize) -> T {
    unsafe { core::ptr::read_unaligned(params.add(offset) as *const T) }
}

/// Returns `true` if the blob at `params` looks like a direct hypervisor
/// handoff (the boot-sector signature and Linux header magic both present).
///
/// # Safety
/// `params` must point at a readable boot-params blob of at least 0x206 bytes.
pub unsafe fn is_direct_handoff(params: *const u8) -> bool {
    let boot_flag: u16 = unsafe { read_at(params, boot_params_offsets::BOOT_FLAG) };
    let magic: u32 = unsafe { read_at(params, boot_params_offsets::HDR_MAGIC) };
    boot_flag == BOOT_FLAG_VALUE && magic == HDR_MAGIC_VALUE
}

/// Walks the e820 table embedded in a direct-handoff boot-params blob,
/// calling `f` with each non-zero-length entry.
///
/// # Safety
/// `params` must point at a valid boot-params blob whose e820 count and
/// table fields (at the fixed offsets from the boot protocol) are
/// consistent with its actual layout.
pub unsafe fn for_each_e820_entry(params: *const u8, mut f: impl FnMut(E820Entry)) {
    let count: u8 = unsafe { read_at(params, boot_params_offsets::E820_COUNT) };
    for i in 0..count as usize {
        let offset = boot_params_offsets::E820_TABLE + i * core::mem::size_of::<E820Entry>();
        let entry: E820Entry = unsafe { read_at(params, offset) };
        if entry.length != 0 {
            f(entry);
        }
    }
}

/// Reads the command line out of a direct-handoff boot-params blob, given a
/// scratch buffer to copy into (the pointer/length fields may point outside
/// memory this kernel keeps mapped past the initial window).
///
/// # Safety
/// `params` must be a valid boot-params blob; `cmdline_ptr` (read from it)
/// must point at `cmdline_len` readable bytes somewhere in physical memory
/// accessible through the identity window still live at this point in boot.
pub unsafe fn copy_cmdline<'a>(params: *const u8, scratch: &'a mut [u8]) -> &'a str {
    let ptr: u32 = unsafe { read_at(params, boot_params_offsets::CMDLINE_PTR) };
    let len: u32 = unsafe { read_at(params, boot_params_offsets::CMDLINE_SIZE) };
    let len = (len as usize).min(scratch.len());
    let src = ptr as *const u8;
    for i in 0..len {
        scratch[i] = unsafe { core::ptr::read_volatile(src.add(i)) };
    }
    core::str::from_utf8(&scratch[..len]).unwrap_or("")
}

/// Maps a raw e820 type code onto this kernel's [`RegionKind`], preserving
/// the firmware's own classification rather than forcing every entry to
/// `Physical`.
pub fn region_kind_from_e820_type(kind: u32) -> RegionKind {
    match kind {
        1 => RegionKind::Physical,
        3 | 4 => RegionKind::AcpiReclaimable,
        _ => RegionKind::Reserved,
    }
}

const PAGE_SIZE: u64 = 0x1000;

/// Splits the region covering `[kernel_base, kernel_base + kernel_size)` out
/// of the e820-derived table: the kernel's own footprint plus two pages
/// immediately before it (reserved for a transient PDPT/PDT) are removed,
/// leaving the surrounding free space as `Physical` regions truncated to
/// page boundaries.
pub fn split_region_around_kernel(
    table: &mut RegionTable,
    e820_base: u64,
    e820_length: u64,
    kernel_base: u64,
    kernel_size: u64,
) {
    let reserved_start = kernel_base - 2 * PAGE_SIZE;
    if reserved_start > e820_base {
        let low_len = (reserved_start - e820_base) & !(PAGE_SIZE - 1);
        if low_len > 0 {
            table.push(Region { start: PhysAddr::new(e820_base), length: low_len, kind: RegionKind::Physical });
        }
    }
    let kernel_end = kernel_base + kernel_size;
    let kernel_end_aligned = kernel_end.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let e820_end = e820_base + e820_length;
    if e820_end > kernel_end_aligned {
        let high_len = e820_end - kernel_end_aligned;
        table.push(Region { start: PhysAddr::new(kernel_end_aligned), length: high_len, kind: RegionKind::Physical });
    }
}

/// Runs the shared tail of both handoff modes: brings up early serial,
/// parses the command line, probes the hardware RNG, builds the global
/// context, starts Application Processors, and enters the run loop on this
/// (the boot) CPU. The actual page-table and heap wiring is architecture-
/// and loader-specific and lives in the boot binary crate that implements
/// [`BootInfo`] (it runs before this function is reached, and has already
/// called [`crate::context::init_heaps`]); this function owns the rest of
/// the ordering and the command-line contract the rest of this module
/// implements.
pub fn kernel_init(boot_info: &impl BootInfo, virtio_mmio: impl FnMut(&str)) -> ! {
    crate::log::init_early_serial();
    crate::arch::x86_64::serial::init();
    cmdline::cmdline_parse(boot_info.cmdline(), virtio_mmio);

    crate::context::init();

    let caps = crate::rand::init_hwrand();
    let seed = crate::rand::random_seed(caps, crate::arch::x86_64::clock::read_tsc);
    crate::kinfo!("boot: hwrand caps={:?} seed={:#x}", caps, seed);

    let present_processors = crate::smp::count_processors(boot_info.madt_entries());
    crate::context::get().set_total_processors(present_processors);
    crate::kinfo!("boot: present_processors={}", present_processors);

    // SAFETY: the loader wrote the trampoline at `ap_trampoline_entry` and
    // guarantees it stays valid until every AP has read it; the heaps
    // aggregate is live (installed before this function was reached).
    unsafe {
        crate::smp::start_secondary_cores(
            &crate::context::heaps().locked,
            present_processors,
            boot_info.ap_trampoline_entry(),
            boot_info.ap_starter(),
        );
    }

    // SAFETY: `local_apic_virt_base` is mapped uncacheable MMIO, live for
    // the life of the kernel.
    let apic = unsafe { crate::arch::x86_64::apic::LocalApic::new(boot_info.local_apic_virt_base()) };
    apic.enable(crate::platform::SPURIOUS_VECTOR);

    let cpu_id = vesper_core::CpuId::new(0);
    let mut platform = crate::platform::KernelPlatform::new(cpu_id, &apic);
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
    use alloc::vec::Vec;

    #[test]
    fn maps_known_e820_types() {
        assert_eq!(region_kind_from_e820_type(1), RegionKind::Physical);
        assert_eq!(region_kind_from_e820_type(2), RegionKind::Reserved);
        assert_eq!(region_kind_from_e820_type(3), RegionKind::AcpiReclaimable);
    }

    #[test]
    fn splits_region_leaving_space_before_and_after_kernel() {
        let mut table = RegionTable::new();
        split_region_around_kernel(&mut table, 0, 0x4000_0000, 0x20_0000, 3 * 0x10_0000);
        let regions: Vec<_> = table.regions().to_vec();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].start.as_u64(), 0);
        assert_eq!(regions[0].length, 0x1F_E000);
        assert_eq!(regions[1].start.as_u64(), 0x50_0000);
        assert_eq!(regions[1].length, 0x4000_0000 - 0x50_0000);
    }
}
