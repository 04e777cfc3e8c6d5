//! # Kernel synchronization primitives
//!
//! * [`SpinMutex`]: test-and-test-and-set spin mutex with RAII guards,
//!   optionally held with interrupts disabled ([`SpinMutex::lock_irq`]).
//! * [`irq`]: interrupt masking helpers and [`IrqGuard`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_mutex;

pub use irq::IrqGuard;
pub use spin_mutex::{IrqMutexGuard, SpinMutex, SpinMutexGuard};
