//! Limine boot stub.
//!
//! This crate is the Limine-specific entry point: it reads the bootloader's
//! responses, builds the boot-time region table, and hands off to
//! [`vesper_kernel::kernel_init`]. The page tables Limine itself built stay
//! in place — [`vesper_kernel::arch::x86_64::paging::X86PageTableMapper`]
//! walks them through the HHDM it also handed us rather than this crate
//! building a second tree from scratch.

#![no_std]
#![no_main]

mod requests;

use requests::REQUESTS;

use vesper_core::{PhysAddr, VirtAddr};
use vesper_kernel::arch::x86_64::apic::read_apic_base_msr;
use vesper_kernel::arch::x86_64::paging::current_page_table_root;
use vesper_kernel::boot::BootInfo;
use vesper_kernel::smp::{ApStarter, MadtEntry};
use vesper_mm::region::{Region, RegionKind, RegionTable};

struct LimineBootInfo {
    regions: RegionTable,
    cmdline: &'static str,
    lapic_virt_base: VirtAddr,
}

/// This requests set has no MP discovery request wired up, so no AP is ever
/// started; `start_secondary_cores` never calls `start_cpu` when
/// `present_processors` stays at the MADT-less default of 1 (see
/// `count_processors`), but the trait object still needs an inhabitant.
struct NoMpStarter;

impl ApStarter for NoMpStarter {
    unsafe fn start_cpu(&self, _cpu_index: u32, _entry_phys: u64) {}
}

impl BootInfo for LimineBootInfo {
    fn regions(&self) -> &RegionTable {
        &self.regions
    }

    fn madt_entries(&self) -> &[MadtEntry] {
        &[]
    }

    fn cmdline(&self) -> &str {
        self.cmdline
    }

    fn local_apic_virt_base(&self) -> VirtAddr {
        self.lapic_virt_base
    }

    fn ap_trampoline_entry(&self) -> u64 {
        0
    }

    fn ap_starter(&self) -> &dyn ApStarter {
        &NoMpStarter
    }
}

fn region_kind_from_limine(kind: limine::memmap::MemMapEntryType) -> RegionKind {
    use limine::memmap::MemMapEntryType;
    match kind {
        MemMapEntryType::Usable => RegionKind::Physical,
        MemMapEntryType::AcpiReclaimable | MemMapEntryType::AcpiTables => RegionKind::AcpiReclaimable,
        MemMapEntryType::AcpiNvs => RegionKind::AcpiNvs,
        MemMapEntryType::BadMemory => RegionKind::Bad,
        MemMapEntryType::BootloaderReclaimable => RegionKind::Reclaim,
        MemMapEntryType::KernelAndModules => RegionKind::KernelImage,
        MemMapEntryType::Reserved | MemMapEntryType::Framebuffer => RegionKind::Reserved,
    }
}

fn build_region_table() -> RegionTable {
    let memmap = REQUESTS.memmap.response().expect("memory map response not available");
    let mut table = RegionTable::new();
    for entry in memmap.entries() {
        table.push(Region {
            start: PhysAddr::new(entry.base),
            length: entry.length,
            kind: region_kind_from_limine(entry.type_),
        });
    }
    table
}

/// Limine entry point, called after the bootloader has loaded the kernel
/// and populated `REQUESTS`. Never returns.
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    assert!(REQUESTS.base_revision.is_supported());

    let hhdm_offset = REQUESTS.hhdm.response().expect("HHDM response not available").hhdm_base;
    let mut regions = build_region_table();
    let page_table_root = current_page_table_root();

    // SAFETY: `page_table_root` was just read out of CR3; Limine's own
    // tables map the kernel image, the regions above, and the HHDM for the
    // life of this boot.
    unsafe {
        vesper_kernel::context::init_heaps(&regions, hhdm_offset, page_table_root);
    }

    {
        let heaps = vesper_kernel::context::heaps();
        let mut physical = heaps.physical.lock();
        vesper_mm::reclaim::reclaim_regions(&mut regions, &mut physical);
    }

    let cmdline = REQUESTS.cmdline.response().map(|r| r.cmdline()).unwrap_or("");
    let lapic_phys = read_apic_base_msr();
    let lapic_virt_base = VirtAddr::new(hhdm_offset + lapic_phys.as_u64());

    let boot_info = LimineBootInfo { regions, cmdline, lapic_virt_base };

    vesper_kernel::kernel_init(&boot_info, |_virtio_mmio_token| {});
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    vesper_kernel::panic::kernel_panic_halt(info)
}
