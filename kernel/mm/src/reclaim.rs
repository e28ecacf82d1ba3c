//! One-time reclaim of loader-owned memory back into the physical id heap,
//! and teardown of the identity-mapped boot window.
//!
//! Both steps are destructive and not idempotent: a second call would hand
//! out already-reclaimed ranges a second time, or unmap a window something
//! else may have since reused. Callers run this exactly once, after the
//! kernel's own heap and mapping are fully operational.

use crate::idheap::IdHeap;
use crate::mmu::PageTableMapper;
use crate::region::{Region, RegionKind, RegionTable};
use vesper_core::{PhysAddr, VirtAddr};

/// Moves every `Reclaim` region out of `table` and into `physical`,
/// consuming the table entries. Must only be called once per region table;
/// a region already reclaimed is gone from `table` and cannot be double-added.
pub fn reclaim_regions(table: &mut RegionTable, physical: &mut IdHeap) {
    table.take_kind(RegionKind::Reclaim, |region: Region| {
        let _ = physical.dealloc(region.start.as_u64(), region.length);
    });
}

/// Unconditionally unmaps the identity window `[pagesize, initial_map_size)`
/// left over from the early boot transition.
///
/// # Safety
/// The caller must ensure no live pointer into this window survives the
/// call — the precondition is not checked, matching the one-time nature of
/// the operation.
pub unsafe fn unmap_initial_window(
    mapper: &impl PageTableMapper,
    pagesize: u64,
    initial_map_size: u64,
) {
    let mut virt = pagesize;
    while virt < initial_map_size {
        unsafe {
            mapper.unmap(VirtAddr::new(virt), pagesize);
        }
        virt += pagesize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaim_moves_regions_into_physical_heap() {
        let mut table = RegionTable::new();
        table.push(Region {
            start: PhysAddr::new(0x10_0000),
            length: 0x1000,
            kind: RegionKind::Reclaim,
        });
        let mut physical = IdHeap::new(0, 0x100_0000);
        // claim everything first so the dealloc below is observable
        physical.alloc(0x100_0000, 1).unwrap();

        reclaim_regions(&mut table, &mut physical);

        assert!(table.regions().is_empty());
        let addr = physical.alloc(0x1000, 1).unwrap();
        assert_eq!(addr, 0x10_0000);
    }
}
