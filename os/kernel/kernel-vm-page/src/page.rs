//! Page descriptors and the page-state machine.

use crate::external::Cache;
use crate::queue::{Linked, QueueKind, QueueLinks};
use alloc::sync::Weak;
use core::fmt;
use kernel_memory_addresses::PhysicalPageNumber;

/// Lifecycle state of a physical page.
///
/// ```text
///   Free ──┐                   ┌──> Active ───┐
///          ├─ allocate ─> Busy ┤              ├─ write recorded ─> Modified
///   Clear ─┘                   └──> Inactive ─┘                      │
///     ^                             ^    ^                           │
///     └─ scrubber <─ Free           │    └── pageout (ref == 0) <─ Busy
///                                   └─────── pageout (ref > 0)
/// ```
///
/// `Free`/`Clear` pages become `Unused` only through boot-time reservation.
/// `Wired` pages are never touched by reservation or reclamation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PageState {
    Active,
    Inactive,
    Busy,
    Modified,
    Free,
    /// Free and known to be zero-filled.
    Clear,
    Wired,
    /// Reserved at boot; not available for allocation.
    Unused,
}

impl PageState {
    pub const ALL: [Self; 8] = [
        Self::Active,
        Self::Inactive,
        Self::Busy,
        Self::Modified,
        Self::Free,
        Self::Clear,
        Self::Wired,
        Self::Unused,
    ];

    /// Short lowercase name, as printed by the debugger commands.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Busy => "busy",
            Self::Modified => "modified",
            Self::Free => "free",
            Self::Clear => "clear",
            Self::Wired => "wired",
            Self::Unused => "unused",
        }
    }

    /// The queue a page in this state lives on.
    #[must_use]
    pub const fn queue(self) -> QueueKind {
        match self {
            Self::Free => QueueKind::Free,
            Self::Clear => QueueKind::Clear,
            Self::Modified => QueueKind::Modified,
            Self::Active | Self::Inactive | Self::Busy | Self::Wired | Self::Unused => {
                QueueKind::Active
            }
        }
    }

    /// `Free` or `Clear`.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::Clear)
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a page descriptor stands for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageKind {
    /// A real frame of RAM.
    Physical,
    /// A marker descriptor without a frame behind it.
    Placeholder,
}

/// One entry of the page table.
pub(crate) struct VmPage {
    pub ppn: PhysicalPageNumber,
    pub kind: PageKind,
    pub state: PageState,
    pub ref_count: u32,
    /// Owning cache, if any. Weak so a dying cache is never kept alive by
    /// its pages.
    pub cache: Option<Weak<dyn Cache>>,
    pub cache_offset: u64,
    links: QueueLinks,
}

impl VmPage {
    pub const fn new(ppn: PhysicalPageNumber) -> Self {
        Self {
            ppn,
            kind: PageKind::Physical,
            state: PageState::Free,
            ref_count: 0,
            cache: None,
            cache_offset: 0,
            links: QueueLinks::new(),
        }
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            ppn: self.ppn,
            kind: self.kind,
            state: self.state,
            ref_count: self.ref_count,
            cache_offset: self.cache.as_ref().map(|_| self.cache_offset),
        }
    }
}

impl Linked for VmPage {
    fn links(&self) -> &QueueLinks {
        &self.links
    }

    fn links_mut(&mut self) -> &mut QueueLinks {
        &mut self.links
    }
}

/// Snapshot of a page descriptor, taken under the page lock.
///
/// Stale as soon as it is returned; use it for diagnostics and decisions
/// that tolerate concurrent change.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageInfo {
    pub ppn: PhysicalPageNumber,
    pub kind: PageKind,
    pub state: PageState,
    pub ref_count: u32,
    /// Offset within the owning cache, if the page belongs to one.
    pub cache_offset: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_maps_to_queue() {
        assert_eq!(PageState::Free.queue(), QueueKind::Free);
        assert_eq!(PageState::Clear.queue(), QueueKind::Clear);
        assert_eq!(PageState::Modified.queue(), QueueKind::Modified);
        for state in [
            PageState::Active,
            PageState::Inactive,
            PageState::Busy,
            PageState::Wired,
            PageState::Unused,
        ] {
            assert_eq!(state.queue(), QueueKind::Active, "{state}");
        }
    }

    #[test]
    fn all_is_indexed_by_discriminant() {
        for (i, state) in PageState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }
}
