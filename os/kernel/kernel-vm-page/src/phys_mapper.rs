//! # HHDM-based Physical Page Mapper
//!
//! With a higher-half direct map (HHDM), every physical address is already
//! mapped at `HHDM_BASE + pa`, so "mapping" a page is an addition and
//! releasing it is a no-op.
//!
//! ## Example
//! ```rust
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vm_page::external::PhysicalPageMapper;
//! use kernel_vm_page::phys_mapper::HhdmPageMapper;
//! use kernel_info::memory::HHDM_BASE;
//!
//! let va = HhdmPageMapper.get_physical_page(PhysicalAddress::new(0x1234_5000));
//! assert_eq!(va.as_u64(), HHDM_BASE + 0x1234_5000);
//! ```

use crate::external::PhysicalPageMapper;
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// [`PhysicalPageMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// The HHDM must be present, writable, and cover all RAM described by the
/// boot memory map.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPageMapper;

// SAFETY: the HHDM maps all of RAM for the lifetime of the kernel.
unsafe impl PhysicalPageMapper for HhdmPageMapper {
    #[inline]
    fn get_physical_page(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(HHDM_BASE + pa.page_number().base().as_u64())
    }

    #[inline]
    fn put_physical_page(&self, _va: VirtualAddress) {}
}
