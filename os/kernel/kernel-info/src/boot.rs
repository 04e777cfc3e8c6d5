//! # Boot Memory Description
//!
//! The loader describes the machine's memory to the kernel with three lists of
//! `(start, size)` ranges:
//!
//! * **physical memory**: RAM that exists,
//! * **physical allocated**: RAM already in use (kernel image, boot stacks,
//!   page tables built by the loader, early kernel allocations),
//! * **virtual allocated**: kernel virtual address space already in use.
//!
//! The boot allocator extends these lists while the kernel comes up. Once the
//! physical page allocator is initialized the lists are frozen and only read
//! once more, to reserve everything that was handed out before.

use core::fmt;

/// Capacity of the physical-memory range list.
pub const MAX_PHYS_MEM_RANGES: usize = 8;

/// Capacity of the physical-allocated range list.
pub const MAX_PHYS_ALLOC_RANGES: usize = 8;

/// Capacity of the virtual-allocated range list.
pub const MAX_VIRT_ALLOC_RANGES: usize = 8;

/// A `[start, start + size)` byte range.
#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct AddressRange {
    pub start: u64,
    pub size: u64,
}

impl AddressRange {
    #[must_use]
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// One past the last byte of the range.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl fmt::Debug for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}..{:#x})", self.start, self.end())
    }
}

/// Fixed-capacity list of [`AddressRange`]s, kept sorted by the loader.
///
/// Stored inline so the whole [`BootMemoryMap`] can cross the loader/kernel
/// boundary as plain bytes.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct RangeList<const N: usize> {
    ranges: [AddressRange; N],
    count: u32,
}

impl<const N: usize> Default for RangeList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RangeList<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: [AddressRange::new(0, 0); N],
            count: 0,
        }
    }

    /// Build a list from a slice, truncating to the capacity.
    #[must_use]
    pub fn from_slice(ranges: &[AddressRange]) -> Self {
        let mut list = Self::new();
        for range in ranges.iter().take(N) {
            let _ = list.push(*range);
        }
        list
    }

    /// Append a range.
    ///
    /// # Errors
    /// Returns the range back if the list is full.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn push(&mut self, range: AddressRange) -> Result<(), AddressRange> {
        let len = self.len();
        if len == N {
            return Err(range);
        }
        self.ranges[len] = range;
        self.count = (len + 1) as u32;
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[AddressRange] {
        &self.ranges[..self.len()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [AddressRange] {
        let len = self.len();
        &mut self.ranges[..len]
    }

    /// Whether any range contains `addr`.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.as_slice().iter().any(|r| r.contains(addr))
    }
}

impl<const N: usize> fmt::Debug for RangeList<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Memory layout handed from the loader to the kernel.
///
/// The physical page allocator is initialized from this structure alone.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BootMemoryMap {
    /// RAM present in the machine, sorted by address.
    pub phys_mem: RangeList<MAX_PHYS_MEM_RANGES>,

    /// RAM already in use, sorted by address.
    pub phys_alloc: RangeList<MAX_PHYS_ALLOC_RANGES>,

    /// Kernel virtual address space already in use, sorted by address.
    pub virt_alloc: RangeList<MAX_VIRT_ALLOC_RANGES>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds_are_half_open() {
        let r = AddressRange::new(0x1000, 0x2000);
        assert!(r.contains(0x1000));
        assert!(r.contains(0x2FFF));
        assert!(!r.contains(0x3000));
        assert_eq!(r.end(), 0x3000);
    }

    #[test]
    fn range_list_rejects_overflow() {
        let mut list = RangeList::<2>::new();
        assert!(list.push(AddressRange::new(0, 1)).is_ok());
        assert!(list.push(AddressRange::new(2, 1)).is_ok());
        assert_eq!(list.push(AddressRange::new(4, 1)), Err(AddressRange::new(4, 1)));
        assert_eq!(list.len(), 2);
        assert!(list.contains(2));
        assert!(!list.contains(3));
    }

    #[test]
    fn from_slice_truncates_to_capacity() {
        let ranges = [
            AddressRange::new(0, 1),
            AddressRange::new(2, 1),
            AddressRange::new(4, 1),
        ];
        let list = RangeList::<2>::from_slice(&ranges);
        assert_eq!(list.as_slice(), &ranges[..2]);
    }
}
