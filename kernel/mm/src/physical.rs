//! The physical id heap: a single [`IdHeap`] spanning all usable physical
//! memory, seeded from the boot region table.
//!
//! Every `Physical` region is aligned inward to a 2 MiB boundary before
//! being added — a region whose ends aren't already 2 MiB aligned loses the
//! unaligned slivers at each end, trading a small amount of RAM for the
//! ability to back the whole physical heap with huge pages.

use crate::idheap::IdHeap;
use crate::region::{RegionKind, RegionTable};
use vesper_core::PhysAddr;

/// Page granularity the physical id heap aligns its regions to.
pub const PHYSICAL_ALIGNMENT: u64 = 0x20_0000;

/// Builds the physical id heap by walking `table` and adding every
/// `Physical` region, aligned inward to [`PHYSICAL_ALIGNMENT`].
///
/// Regions whose aligned length is zero (an unaligned sliver smaller than
/// one 2 MiB page) are dropped entirely rather than added as a zero-length
/// range.
pub fn build_physical_heap(table: &RegionTable) -> IdHeap {
    let mut min = u64::MAX;
    let mut max = 0u64;
    for region in table.regions() {
        if region.kind != RegionKind::Physical {
            continue;
        }
        min = min.min(region.start.as_u64());
        max = max.max(region.end().as_u64());
    }
    if min > max {
        min = 0;
        max = 0;
    }

    let mut heap = IdHeap::new(min, max.saturating_sub(min));
    // Claim the whole managed span up front so `alloc` never hands out a
    // sliver we haven't explicitly marked usable, then free back only the
    // aligned, actually-usable ranges.
    let _ = heap.alloc(max.saturating_sub(min), 1);

    for region in table.regions() {
        if region.kind != RegionKind::Physical {
            continue;
        }
        if let Some((start, length)) = align_inward(region.start, region.length) {
            let _ = heap.dealloc(start.as_u64(), length);
        }
    }

    heap
}

/// Aligns `[start, start+length)` inward to [`PHYSICAL_ALIGNMENT`].
/// Returns `None` if the aligned length is zero.
fn align_inward(start: PhysAddr, length: u64) -> Option<(PhysAddr, u64)> {
    let aligned_start = start.align_up(PHYSICAL_ALIGNMENT);
    let end = start + length;
    let aligned_end = PhysAddr::new_truncate(end.as_u64() & !(PHYSICAL_ALIGNMENT - 1));
    if aligned_end <= aligned_start {
        return None;
    }
    Some((aligned_start, aligned_end.as_u64() - aligned_start.as_u64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn drops_regions_that_dont_survive_inward_alignment() {
        // [0x1000, 0x1000+0x20_0000) rounds its start up to 0x20_0000 and its
        // end down to 0x20_0000 too -- aligning inward consumes the entire
        // region, so it's dropped rather than added as a zero-length range.
        assert!(align_inward(PhysAddr::new(0x1000), 0x20_0000).is_none());
        // region too small to survive inward alignment at all
        assert!(align_inward(PhysAddr::new(0x1000), 0x1000).is_none());
    }

    #[test]
    fn aligned_region_fully_contained() {
        let (start, len) = align_inward(PhysAddr::new(0x1000), 0x40_0000).unwrap();
        assert!(start.as_u64() >= 0x1000);
        assert!(start.as_u64() + len <= 0x1000 + 0x40_0000);
        assert_eq!(start.as_u64() % PHYSICAL_ALIGNMENT, 0);
        assert_eq!(len % PHYSICAL_ALIGNMENT, 0);
    }

    #[test]
    fn build_physical_heap_allocates_from_usable_regions() {
        let mut table = RegionTable::new();
        table.push(Region {
            start: PhysAddr::new(0),
            length: 0x100_0000,
            kind: RegionKind::Physical,
        });
        table.push(Region {
            start: PhysAddr::new(0x100_0000),
            length: 0x10_0000,
            kind: RegionKind::Reserved,
        });
        let mut heap = build_physical_heap(&table);
        let allocated = heap.alloc(0x20_0000, PHYSICAL_ALIGNMENT).unwrap();
        assert_eq!(allocated % PHYSICAL_ALIGNMENT, 0);
    }
}
