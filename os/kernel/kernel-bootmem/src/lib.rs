//! # Bootstrap Memory Allocator
//!
//! Allocates kernel virtual space and physical pages directly from the
//! loader's [`BootMemoryMap`], before the physical page allocator exists.
//!
//! ## How it works
//!
//! The allocator never keeps its own bookkeeping. Every allocation *extends an
//! existing range in place*:
//!
//! * virtual space grows a virtual-allocated range into the gap that follows
//!   it (or precedes the first range),
//! * a physical page grows a physical-allocated range by one page, as long as
//!   the page is backed by RAM and does not run into the next allocated range.
//!
//! Because of that, the updated map describes exactly what was handed out, and
//! the page allocator can later reserve those pages by reading the map once.
//!
//! ## Hand-off
//!
//! [`BootAllocator::finish`] ends the bootstrap phase and returns the final
//! map. Any later call into the allocator is a kernel bug and panics.
//!
//! ## WARNING
//!
//! - Nothing is ever freed.
//! - Pages are not zeroed.
//! - Only valid until the page allocator is initialized from the returned map.

#![cfg_attr(not(any(test, doctest)), no_std)]

use kernel_info::boot::{AddressRange, BootMemoryMap};
use kernel_info::memory::{KERNEL_BASE, KERNEL_TOP};
use kernel_info::protection::LockFlags;
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPageNumber, VirtualAddress, page_align_up,
};
use log::{debug, info, warn};

/// Errors returned by the [`BootAllocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootMemError {
    #[error("zero-sized boot allocation")]
    EmptyRequest,
    #[error("no kernel virtual space left for {size:#x} bytes")]
    OutOfVirtualSpace { size: u64 },
    #[error("no physical page left to extend a boot allocation")]
    OutOfPhysicalPages,
    #[error("failed to map {va} to {pa}")]
    MapFailed {
        va: VirtualAddress,
        pa: PhysicalAddress,
    },
}

/// Source of **physical** 4 KiB frames while mapping early allocations.
///
/// Returned frames **must** be 4 KiB aligned. Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;
}

/// Installs kernel mappings before the virtual memory system is up.
///
/// Implemented by the architecture's translation map code. Intermediate page
/// tables it needs must be taken from `frames`, which hands out pages from
/// the same boot map so they are reserved later like every other early page.
pub trait EarlyMapper {
    type Error: core::fmt::Debug;

    /// Map the page at `pa` to `va` with the given protection.
    ///
    /// # Errors
    /// Implementation specific; the allocator reports any error as
    /// [`BootMemError::MapFailed`].
    fn map_page(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: LockFlags,
        frames: &mut dyn FrameAlloc,
    ) -> Result<(), Self::Error>;
}

/// Bootstrap-only allocator over the loader's memory map.
///
/// # WARNING
/// Do not use after [`finish`](Self::finish); every entry point panics then.
pub struct BootAllocator {
    map: BootMemoryMap,
    done: bool,
}

impl BootAllocator {
    #[must_use]
    pub const fn new(map: BootMemoryMap) -> Self {
        Self { map, done: false }
    }

    /// Current state of the memory map, including everything allocated so far.
    #[must_use]
    pub const fn memory_map(&self) -> &BootMemoryMap {
        &self.map
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.done
    }

    /// End the bootstrap phase and hand the final map to the page allocator.
    ///
    /// # Panics
    /// Panics if called twice.
    pub fn finish(&mut self) -> BootMemoryMap {
        self.assert_usable();
        self.done = true;
        info!(
            "bootmem: done, {} physical allocated range(s), {} virtual allocated range(s)",
            self.map.phys_alloc.len(),
            self.map.virt_alloc.len()
        );
        self.map
    }

    fn assert_usable(&self) {
        assert!(
            !self.done,
            "BUG: bootstrap allocator used after the page allocator took over"
        );
    }

    /// Reserve `size` bytes (rounded up to pages) of kernel virtual space.
    ///
    /// Search order:
    /// 1. the gap between two consecutive virtual-allocated ranges (the lower
    ///    range grows up),
    /// 2. after the last range, up to [`KERNEL_TOP`],
    /// 3. before the first range, down to [`KERNEL_BASE`] (the first range
    ///    grows down).
    ///
    /// # Errors
    /// [`BootMemError::OutOfVirtualSpace`] if none of the candidates fits.
    ///
    /// # Panics
    /// Panics after [`finish`](Self::finish).
    pub fn alloc_virtual_space(&mut self, size: u64) -> Result<VirtualAddress, BootMemError> {
        self.assert_usable();
        if size == 0 {
            return Err(BootMemError::EmptyRequest);
        }
        let size = page_align_up(size);
        let ranges = self.map.virt_alloc.as_mut_slice();

        if ranges.is_empty() {
            let range = AddressRange::new(KERNEL_BASE, size);
            if range.end() - 1 > KERNEL_TOP {
                return Err(BootMemError::OutOfVirtualSpace { size });
            }
            self.map
                .virt_alloc
                .push(range)
                .map_err(|_| BootMemError::OutOfVirtualSpace { size })?;
            return Ok(VirtualAddress::new(KERNEL_BASE));
        }

        for i in 1..ranges.len() {
            let gap_start = ranges[i - 1].end();
            if ranges[i].start.saturating_sub(gap_start) >= size {
                ranges[i - 1].size += size;
                return Ok(VirtualAddress::new(gap_start));
            }
        }

        let last = ranges.len() - 1;
        let tail_start = ranges[last].end();
        if tail_start <= KERNEL_TOP && KERNEL_TOP - tail_start >= size - 1 {
            ranges[last].size += size;
            return Ok(VirtualAddress::new(tail_start));
        }

        if ranges[0].start.saturating_sub(KERNEL_BASE) >= size {
            ranges[0].start -= size;
            ranges[0].size += size;
            return Ok(VirtualAddress::new(ranges[0].start));
        }

        warn!("bootmem: no virtual space for {size:#x} bytes");
        Err(BootMemError::OutOfVirtualSpace { size })
    }

    /// Take one physical page by growing a physical-allocated range.
    ///
    /// Ranges are tried in order. A range is skipped if the page after it is
    /// already the start of the next allocated range, or if that page is not
    /// backed by physical memory.
    ///
    /// # Errors
    /// [`BootMemError::OutOfPhysicalPages`] if no range can grow.
    ///
    /// # Panics
    /// Panics after [`finish`](Self::finish).
    pub fn alloc_physical_page(&mut self) -> Result<PhysicalPageNumber, BootMemError> {
        self.assert_usable();
        let ranges = self.map.phys_alloc.as_mut_slice();

        for i in 0..ranges.len() {
            let next_page = ranges[i].end();

            if let Some(following) = ranges.get(i + 1)
                && following.size != 0
                && next_page >= following.start
            {
                continue;
            }

            if self.map.phys_mem.contains(next_page) {
                ranges[i].size += PAGE_SIZE;
                return Ok(PhysicalAddress::new(next_page).page_number());
            }
        }

        Err(BootMemError::OutOfPhysicalPages)
    }

    /// Allocate `size` bytes (rounded up to pages) of mapped kernel memory.
    ///
    /// Reserves virtual space, then takes and maps one physical page at a
    /// time. Page tables the mapper needs come from this allocator as well.
    ///
    /// # Errors
    /// Any error of [`alloc_virtual_space`](Self::alloc_virtual_space) or
    /// [`alloc_physical_page`](Self::alloc_physical_page), or
    /// [`BootMemError::MapFailed`] if the mapper refuses a page.
    ///
    /// # Panics
    /// Panics after [`finish`](Self::finish).
    pub fn alloc_from_boot_args<M: EarlyMapper>(
        &mut self,
        size: u64,
        flags: LockFlags,
        mapper: &mut M,
    ) -> Result<VirtualAddress, BootMemError> {
        let base = self.alloc_virtual_space(size)?;
        let size = page_align_up(size);

        let mut offset = 0;
        while offset < size {
            let va = base + offset;
            let pa = self.alloc_physical_page()?.base();
            if let Err(e) = mapper.map_page(va, pa, flags, self) {
                warn!("bootmem: mapping {va} -> {pa} failed: {e:?}");
                return Err(BootMemError::MapFailed { va, pa });
            }
            offset += PAGE_SIZE;
        }

        debug!("bootmem: {size:#x} bytes at {base} ({flags:?})");
        Ok(base)
    }
}

impl FrameAlloc for BootAllocator {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        self.alloc_physical_page().ok().map(PhysicalPageNumber::base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::RangeList;

    fn allocator(virt: &[AddressRange]) -> BootAllocator {
        let mut map = BootMemoryMap::default();
        map.virt_alloc = RangeList::from_slice(virt);
        BootAllocator::new(map)
    }

    #[test]
    fn virtual_space_fills_gap_first() {
        let mut boot = allocator(&[
            AddressRange::new(KERNEL_BASE, 0x1000),
            AddressRange::new(KERNEL_BASE + 0x4000, 0x1000),
        ]);

        let va = boot.alloc_virtual_space(0x2000).unwrap();
        assert_eq!(va.as_u64(), KERNEL_BASE + 0x1000);
        assert_eq!(
            boot.memory_map().virt_alloc.as_slice()[0],
            AddressRange::new(KERNEL_BASE, 0x3000)
        );
    }

    #[test]
    fn virtual_space_appends_after_last_when_gaps_are_too_small() {
        let mut boot = allocator(&[
            AddressRange::new(KERNEL_BASE, 0x1000),
            AddressRange::new(KERNEL_BASE + 0x2000, 0x1000),
        ]);

        let va = boot.alloc_virtual_space(0x1800).unwrap();
        assert_eq!(va.as_u64(), KERNEL_BASE + 0x3000);
        assert_eq!(
            boot.memory_map().virt_alloc.as_slice()[1],
            AddressRange::new(KERNEL_BASE + 0x2000, 0x3000)
        );
    }

    #[test]
    fn virtual_space_grows_first_range_down_when_top_is_full() {
        let top_start = KERNEL_TOP + 1 - 0x1000;
        let mut boot = allocator(&[AddressRange::new(top_start, 0x1000)]);

        let va = boot.alloc_virtual_space(0x1000).unwrap();
        assert_eq!(va.as_u64(), top_start - 0x1000);
        assert_eq!(
            boot.memory_map().virt_alloc.as_slice()[0],
            AddressRange::new(top_start - 0x1000, 0x2000)
        );
    }

    #[test]
    fn virtual_space_starts_at_kernel_base_when_empty() {
        let mut boot = allocator(&[]);
        let va = boot.alloc_virtual_space(1).unwrap();
        assert_eq!(va.as_u64(), KERNEL_BASE);
        assert_eq!(boot.memory_map().virt_alloc.len(), 1);
    }

    #[test]
    fn zero_sized_requests_are_rejected() {
        let mut boot = allocator(&[]);
        assert_eq!(
            boot.alloc_virtual_space(0),
            Err(BootMemError::EmptyRequest)
        );
    }
}
