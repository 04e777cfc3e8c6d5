//! # Memory Layout

/// Start of the kernel half of the virtual address space.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Size of the kernel address window starting at [`KERNEL_BASE`].
pub const KERNEL_SIZE: u64 = 0x7fff_f000;

/// Highest usable kernel virtual address (inclusive).
///
/// Boot-time virtual allocations must end at or below this ceiling.
pub const KERNEL_TOP: u64 = KERNEL_BASE + (KERNEL_SIZE - 1);

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel image is placed in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

const _: () = {
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(KERNEL_SIZE.is_multiple_of(4096));
    assert!(KERNEL_TOP > KERNEL_BASE);
};
