//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and physical page numbers used by
//! the boot-time allocator and the physical page allocator.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address in the current (page-table translated) address space. |
//! | [`PhysicalPageNumber`] | The index of a 4 KiB frame, i.e. `physical address >> 12`. |
//!
//! All types are `#[repr(transparent)]` wrappers around `u64` and implement
//! `Copy`, `Eq`, `Ord` and `Hash`, so they can be used as keys and passed
//! across the boot ABI unchanged.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! let ppn = pa.page_number();
//! assert_eq!(ppn.as_u64(), 0x102);
//! assert_eq!(ppn.base().as_u64(), 0x0010_2000);
//! assert_eq!(pa.page_offset(), 0x42);
//!
//! assert_eq!(page_align_up(0x1001), 0x2000);
//! assert_eq!(pages_spanned(0x1001), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Page size as `usize`, for slice lengths.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_SIZE_USIZE: usize = PAGE_SIZE as usize;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Round `value` up to the next page boundary.
#[inline]
#[must_use]
pub const fn page_align_up(value: u64) -> u64 {
    (value + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1)
}

/// Round `value` down to the containing page boundary.
#[inline]
#[must_use]
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Number of pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_spanned(bytes: u64) -> u64 {
    page_align_up(bytes) >> PAGE_SHIFT
}

/// A physical byte address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn page_number(self) -> PhysicalPageNumber {
        PhysicalPageNumber(self.0 >> PAGE_SHIFT)
    }

    /// Offset of this address within its frame.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// A virtual byte address in the current address space.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Address of a pointer in the current address space.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reinterpret the address as a raw pointer.
    ///
    /// Creating the pointer is safe; dereferencing it is only valid while the
    /// address is mapped.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Physical page number (PPN): the index of a frame in physical memory.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPageNumber(u64);

impl PhysicalPageNumber {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0 << PAGE_SHIFT)
    }

    /// Distance from `origin` in pages, if `self` is not below it.
    #[inline]
    #[must_use]
    pub const fn checked_offset_from(self, origin: Self) -> Option<u64> {
        self.0.checked_sub(origin.0)
    }
}

impl fmt::Debug for PhysicalPageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPageNumber({:#x})", self.0)
    }
}

impl fmt::Display for PhysicalPageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<u64> for PhysicalPageNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(page_align_up(0), 0);
        assert_eq!(page_align_up(1), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align_down(PAGE_SIZE + 17), PAGE_SIZE);
        assert_eq!(pages_spanned(0), 0);
        assert_eq!(pages_spanned(3 * PAGE_SIZE + 1), 4);
    }

    #[test]
    fn physical_address_splits_into_frame_and_offset() {
        let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
        assert_eq!(pa.page_number().base().as_u64() + pa.page_offset(), pa.as_u64());
        assert!(!pa.is_page_aligned());
        assert!(pa.page_number().base().is_page_aligned());
    }

    #[test]
    fn page_number_offsets() {
        let origin = PhysicalPageNumber::new(0x100);
        assert_eq!((origin + 5).checked_offset_from(origin), Some(5));
        assert_eq!(PhysicalPageNumber::new(0xFF).checked_offset_from(origin), None);
    }

    #[test]
    fn virtual_address_pointer_round_trip() {
        let value = 7_u32;
        let va = VirtualAddress::from_ptr(&raw const value);
        assert_eq!(va.as_mut_ptr::<u32>().cast_const(), &raw const value);
    }
}
