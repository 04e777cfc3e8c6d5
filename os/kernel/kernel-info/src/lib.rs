//! # Boot Memory Interface and Kernel Layout
//!
//! This crate defines the data the loader hands to the kernel about memory,
//! together with the layout constants every memory subsystem agrees on.
//!
//! ## Overview
//!
//! The physical page allocator and the boot allocator both start from the
//! same description of the machine: which physical ranges exist, which are
//! already taken, and which kernel virtual ranges are in use. Keeping those
//! structures here lets the loader, the boot allocator and the page
//! allocator share one ABI.
//!
//! ## Modules
//!
//! ### Boot Memory Map ([`boot`])
//! * **Range lists**: fixed-capacity, `#[repr(C)]` lists of `(start, size)`
//! * **Three views**: physical memory, physical allocated, virtual allocated
//!
//! ### Memory Layout ([`memory`])
//! * **Kernel window**: [`KERNEL_BASE`](memory::KERNEL_BASE) up to the
//!   inclusive ceiling [`KERNEL_TOP`](memory::KERNEL_TOP)
//! * **Direct map**: [`HHDM_BASE`](memory::HHDM_BASE) for physical access
//!
//! ### Protection ([`protection`])
//! * **[`LockFlags`](protection::LockFlags)**: bitfield handed to the
//!   translation map for early mappings
//!
//! ```text
//! Kernel Virtual Window:
//!
//! HHDM_BASE   ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!             │   Higher Half Direct Mapping    │
//! KERNEL_BASE ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!             │  Kernel image, boot allocations │
//! KERNEL_TOP  ├─────────────────────────────────┤ 0xffff_ffff_ffff_efff
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::{AddressRange, BootMemoryMap, RangeList};
//!
//! let mut map = BootMemoryMap::default();
//! map.phys_mem = RangeList::from_slice(&[AddressRange::new(0, 0x0100_0000)]);
//! map.phys_alloc = RangeList::from_slice(&[AddressRange::new(0x0010_0000, 0x0004_0000)]);
//! assert!(map.phys_alloc.contains(0x0010_1000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod protection;
