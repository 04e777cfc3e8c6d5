use crate::page::PageState;
use kernel_memory_addresses::PhysicalPageNumber;

/// Errors returned by [`VmPages`](crate::VmPages).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPageError {
    #[error("out of physical memory ({requested} page(s) requested)")]
    OutOfPhysicalMemory { requested: usize },
    #[error("no page descriptor for {0}")]
    PageNotFound(PhysicalPageNumber),
    #[error("pages cannot be allocated as {0}")]
    InvalidRequestedState(PageState),
    #[error("page range {start} + {len} is outside the page table")]
    RangeOutOfBounds {
        start: PhysicalPageNumber,
        len: usize,
    },
    #[error("page {0} is still referenced")]
    PageReferenced(PhysicalPageNumber),
    #[error("page {0} is not in use")]
    PageNotInUse(PhysicalPageNumber),
    #[error("zero-length page run")]
    EmptyRun,
    #[error("boot memory map has no physical memory")]
    EmptyMemoryMap,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Error reported by a [`BackingStore`](crate::external::BackingStore) write.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error")]
    Io,
    #[error("no space left on backing store")]
    NoSpace,
    #[error("offset {0:#x} is beyond the end of the backing store")]
    OutOfRange(u64),
}

/// A kernel thread or semaphore could not be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("failed to create {name}")]
pub struct SpawnError {
    pub name: &'static str,
}
