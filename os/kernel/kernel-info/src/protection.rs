//! # Mapping Protection

use bitfield_struct::bitfield;

/// Protection requested for a mapping established during boot.
///
/// Passed through unchanged from callers of the boot allocator to the
/// translation map that installs the mapping.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LockFlags {
    /// Bit 0: Writable.
    ///
    /// - 0: read-only mapping.
    /// - 1: read/write mapping.
    pub writable: bool,

    /// Bit 1: Kernel only.
    ///
    /// Set for supervisor mappings that user mode must not reach.
    pub kernel: bool,

    /// Bits 2–31: Reserved (must be 0).
    #[bits(30, default = 0)]
    _reserved_2_31: u32,
}

impl LockFlags {
    /// Read/write kernel mapping, the common case for early kernel structures.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_writable(true).with_kernel(true)
    }

    /// Read-only kernel mapping.
    #[must_use]
    pub const fn kernel_ro() -> Self {
        Self::new().with_kernel(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_rw_sets_both_bits() {
        let flags = LockFlags::kernel_rw();
        assert!(flags.writable());
        assert!(flags.kernel());
        assert_eq!(flags.into_bits(), 0b11);
    }

    #[test]
    fn kernel_ro_is_not_writable() {
        let flags = LockFlags::kernel_ro();
        assert!(!flags.writable());
        assert_eq!(flags.into_bits(), 0b10);
    }
}
