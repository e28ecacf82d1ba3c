//! The kernel heaps aggregate: everything `vesper-mm` builds, wired
//! together once during boot and never torn down.
//!
//! Construction order matches §4.1-§4.4 of the boot sequence: the physical
//! id heap first (it only needs the region table), then the virtual id
//! heaps (a fixed VA window, no dependency on physical memory), then the
//! page-table mapper, then the backed heaps layered on top of both.
//!
//! The mapper, physical heap and linear-backed heap are each boxed before
//! anything borrows them: a `Box`'s heap allocation keeps a stable address
//! even as the `Box` handle itself is moved into the final [`KernelHeaps`],
//! which is what lets [`PageBackedHeapHandle`] and the mcaches below hold
//! `'static` references into fields of the very struct they live in.

use alloc::boxed::Box;

use vesper_core::sync::{OnceCell, SpinLock};
use vesper_core::VirtAddr;
use vesper_mm::heap::{Heap, LinearBackedHeap, PageBackedHeap};
use vesper_mm::locked::LockedHeap;
use vesper_mm::mcache::Mcache;
use vesper_mm::pageflags::PageFlags;
use vesper_mm::virt::VirtualHeaps;
use vesper_mm::{physical, IdHeap, RegionTable};

use crate::arch::x86_64::paging::X86PageTableMapper;

/// Base of the fixed kernel virtual address window this build carves its
/// heaps out of. Chosen to sit well above any identity-mapped low memory
/// and any HHDM-style direct map a loader might also establish.
pub const KMEM_BASE: u64 = 0xFFFF_FF00_0000_0000;
/// Size of the kernel virtual address window.
pub const KMEM_SIZE: u64 = 0x0000_0100_0000_0000;
/// Fraction of [`KMEM_SIZE`] given to the huge-page virtual heap; the rest
/// goes to the 4 KiB heap.
const KMEM_HUGE_FRACTION_PCT: u64 = 25;

/// Everything `vesper-mm` builds during boot, bundled per the spec's
/// "kernel heaps aggregate". `general` is the unlocked mcache used only
/// while the kernel lock is held; `locked` wraps a second mcache safe from
/// any context.
pub struct KernelHeaps {
    /// The page-table mapper every backed heap below maps through.
    pub mapper: Box<X86PageTableMapper>,
    /// Physical id heap: all allocatable RAM, 2 MiB-aligned.
    pub physical: Box<SpinLock<IdHeap>>,
    /// The kernel VA window's huge-page and 4 KiB id heaps.
    pub virtual_heaps: SpinLock<VirtualHeaps>,
    /// Page-backed heap: one mapping per allocation, built over a slice of
    /// the kernel VA window reserved up front.
    pub page_backed: PageBackedHeapHandle,
    /// Linear-backed heap: the general-purpose kernel heap's backing
    /// window, mapped once at boot.
    pub linear_backed: Box<LinearBackedHeap>,
    /// Unlocked mcache over the linear-backed heap, for use only while the
    /// kernel lock is held.
    pub general: Mcache<'static, LinearBackedHeap>,
    /// Locked mcache over the linear-backed heap, safe from any context.
    pub locked: LockedHeap<Mcache<'static, LinearBackedHeap>>,
}

/// A `PageBackedHeap` borrowing the mapper and physical heap boxed
/// alongside it in [`KernelHeaps`]. See that struct's docs for why the
/// `'static` borrow here is sound.
pub struct PageBackedHeapHandle(PageBackedHeap<'static, X86PageTableMapper>);

impl core::ops::Deref for PageBackedHeapHandle {
    type Target = PageBackedHeap<'static, X86PageTableMapper>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Extends a reference into a boxed allocation to `'static`. Sound because
/// the `Box` backing it is never reallocated or dropped for the life of the
/// kernel: moving the `Box` handle itself (into the final [`KernelHeaps`])
/// does not move the heap memory it points at.
///
/// # Safety
/// The `Box` `r` was taken from must outlive every use of the returned
/// reference.
unsafe fn leak<T>(r: &T) -> &'static T {
    unsafe { &*(r as *const T) }
}

/// Builds the kernel heaps aggregate from the boot-time region table and a
/// page-table mapper rooted at `page_table_root`.
///
/// # Safety
/// `hhdm_offset`/`page_table_root` must describe a page-table tree this
/// kernel owns exclusively, reachable through the HHDM at `hhdm_offset` for
/// the life of the kernel.
pub unsafe fn init_kernel_heaps(
    regions: &RegionTable,
    hhdm_offset: u64,
    page_table_root: vesper_core::PhysAddr,
) -> KernelHeaps {
    let physical = Box::new(SpinLock::new(physical::build_physical_heap(regions)));
    // SAFETY: caller guarantees the HHDM/root precondition.
    let mapper = Box::new(unsafe { X86PageTableMapper::new(hhdm_offset, page_table_root) });

    let virtual_heaps = VirtualHeaps::new(VirtAddr::new(KMEM_BASE), KMEM_SIZE, KMEM_HUGE_FRACTION_PCT);

    // Carve the page-backed heap's window out of the low end of the
    // non-huge part of the kernel VA window, the general heap's
    // linear-backed window out of the rest.
    let huge_size = (KMEM_SIZE * KMEM_HUGE_FRACTION_PCT) / 100;
    let remaining = KMEM_SIZE - huge_size;
    let page_backed_base = VirtAddr::new(KMEM_BASE + huge_size);
    let page_backed_size = remaining / 2;
    let linear_base = page_backed_base + page_backed_size;
    let linear_size = remaining - page_backed_size;

    let linear_backed = Box::new(LinearBackedHeap::new(linear_base, linear_size, 0x1000));

    // SAFETY: `mapper`, `physical` and `linear_backed` are boxed above and
    // will only ever be moved (not reallocated) from here on.
    let mapper_ref: &'static X86PageTableMapper = unsafe { leak(&mapper) };
    let physical_ref: &'static SpinLock<IdHeap> = unsafe { leak(&physical) };
    let linear_ref: &'static LinearBackedHeap = unsafe { leak(&linear_backed) };

    let page_backed = PageBackedHeap::new(
        page_backed_base,
        page_backed_size,
        0x1000,
        PageFlags::memory().writable(),
        mapper_ref,
        physical_ref,
    );
    let general = Mcache::new(linear_ref);
    let locked = LockedHeap::new(Mcache::new(linear_ref));

    KernelHeaps {
        mapper,
        physical,
        virtual_heaps: SpinLock::new(virtual_heaps),
        page_backed: PageBackedHeapHandle(page_backed),
        linear_backed,
        general,
        locked,
    }
}

/// The global kernel heaps instance. Populated exactly once by
/// [`crate::context::init`] during boot; every CPU thereafter reaches it
/// through [`crate::context::heaps`].
pub(crate) static KERNEL_HEAPS: OnceCell<KernelHeaps> = OnceCell::new();

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_mm::region::{Region, RegionKind, RegionTable};

    #[test]
    fn builds_heaps_that_satisfy_allocations() {
        let mut regions = RegionTable::new();
        regions.push(Region {
            start: vesper_core::PhysAddr::new(0x20_0000),
            length: 0x200_0000,
            kind: RegionKind::Physical,
        });
        // A real kernel would point `page_table_root` at an actual PML4 and
        // `hhdm_offset` at a mapped window; this test only exercises the
        // bookkeeping (id-heap splits, box addresses staying stable), never
        // dereferencing through the mapper.
        let heaps = unsafe {
            init_kernel_heaps(&regions, 0, vesper_core::PhysAddr::zero())
        };
        assert!(heaps.virtual_heaps.lock().alloc_small(1).is_ok());
        assert_eq!(heaps.page_backed.pagesize(), 0x1000);
    }
}
