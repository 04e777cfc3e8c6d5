//! # Physical Page Allocator
//!
//! This crate owns every physical page of the machine once the kernel is past
//! its bootstrap phase. It tracks the state of each page, hands out single
//! pages and contiguous runs, and runs two background daemons that keep the
//! supply of zeroed pages up and the backlog of dirty pages down.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     VmPages                         │
//! │    • allocate_page / allocate_specific_page         │
//! │    • allocate_page_run / set_page_state             │
//! │    • boot-time reservation, diagnostics             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ page lock (spin, interrupts off)
//! ┌─────────────────▼───────────────────────────────────┐
//! │                    Page Table                       │
//! │    • one descriptor per physical page               │
//! │    • Free / Clear / Modified / Active queues        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//!        ┌──────────┴───────────┐
//! ┌──────▼──────┐        ┌──────▼──────┐
//! │  Scrubber   │        │   Pageout   │
//! │ Free->Clear │        │  Modified   │
//! │  (zeroing)  │        │ -> store    │
//! └─────────────┘        └─────────────┘
//! ```
//!
//! ## Page Lock Discipline
//!
//! One [`SpinMutex`] protects the page table and all queues. It is always
//! taken with interrupts disabled ([`SpinMutex::lock_irq`]) and is never held
//! across anything that can block: zeroing, mapping pages and backing-store
//! I/O all happen after the lock is released, on pages that were first marked
//! [`PageState::Busy`] so nobody else can claim them.
//!
//! ## Queue Invariant
//!
//! Every page sits on exactly one queue, the one [`PageState::queue`] names
//! for its state. `Free` and `Clear` pages always have a reference count of
//! zero.
//!
//! ## Initialization
//!
//! 1. [`VmPages::new`] builds the table from the boot memory map handed over
//!    by the bootstrap allocator and reserves everything already in use.
//! 2. [`VmPages::start_daemons`] starts the scrubber (and, if configured, the
//!    pageout daemon) once kernel threads exist.
//! 3. [`VmPages::register_debugger_commands`] adds `page_stats` and
//!    `page_queues` to the kernel debugger.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let boot_map = boot_allocator.finish();
//! let pages = Arc::new(VmPages::new(&boot_map, HhdmPageMapper, VmPageConfig::default())?);
//! pages.start_daemons(&threads)?;
//!
//! let ppn = pages.allocate_page(PageState::Clear)?;
//! // ... populate, map ...
//! pages.set_page_state(ppn, PageState::Active)?;
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod config;
mod diagnostics;
mod error;
pub mod external;
mod page;
mod pageout;
pub mod phys_mapper;
mod queue;
mod scrubber;
mod table;

pub use config::{ExhaustionPolicy, VmPageConfig};
pub use diagnostics::PageStats;
pub use error::{SpawnError, StoreError, VmPageError};
pub use page::{PageInfo, PageKind, PageState};
pub use pageout::{PageoutStats, PageoutStep};
pub use queue::QueueKind;
pub use scrubber::ScrubberStats;

use crate::external::{Cache, KernelThreads, MappedPage, PhysicalPageMapper, ThreadPriority};
use crate::queue::PageIndex;
use crate::table::PageTable;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::boot::BootMemoryMap;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPageNumber, page_align_up};
use kernel_sync::{IrqMutexGuard, SpinMutex};
use log::{debug, error, info, warn};

/// The physical page allocator.
///
/// Constructed once at boot and shared by reference counting; there is no
/// global instance.
pub struct VmPages<M> {
    /// The page lock.
    pages: SpinMutex<PageTable>,
    mapper: M,
    config: VmPageConfig,
    trimming: AtomicBool,
    scrubber_stats: ScrubberStats,
    pageout_stats: PageoutStats,
}

impl<M: PhysicalPageMapper> VmPages<M> {
    /// Build the page table from the final boot memory map.
    ///
    /// The table spans from the lowest to the highest physical-memory range.
    /// Pages in holes between ranges and pages the bootstrap allocator handed
    /// out are reserved (`Unused`); everything else starts `Free`.
    ///
    /// # Errors
    /// [`VmPageError::EmptyMemoryMap`] if the map describes no memory.
    pub fn new(boot: &BootMemoryMap, mapper: M, config: VmPageConfig) -> Result<Self, VmPageError> {
        let ranges = boot.phys_mem.as_slice();
        let start = ranges
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.start)
            .min()
            .ok_or(VmPageError::EmptyMemoryMap)?;
        let end = ranges.iter().map(|r| r.end()).max().unwrap_or(start);

        let base = PhysicalAddress::new(start).page_number();
        let top = PhysicalAddress::new(page_align_up(end)).page_number();
        #[allow(clippy::cast_possible_truncation)]
        let count = (top.as_u64() - base.as_u64()) as usize;

        let mut table = PageTable::new(base, count);

        let mut holes = 0;
        for idx in 0..count {
            if !boot.phys_mem.contains(table.ppn_of(idx).base().as_u64()) {
                table.set_state(idx, PageState::Unused);
                holes += 1;
            }
        }

        let mut reserved = 0;
        for range in boot.phys_alloc.as_slice() {
            let first = PhysicalAddress::new(range.start).page_number();
            let last = PhysicalAddress::new(page_align_up(range.end())).page_number();
            #[allow(clippy::cast_possible_truncation)]
            let len = (last.as_u64() - first.as_u64()) as usize;
            match Self::range_index(&table, first, len) {
                Ok(idx) => reserved += table.mark_range_in_use(idx, len),
                Err(e) => warn!("vm_page: ignoring boot allocation {range:?}: {e}"),
            }
        }

        info!(
            "vm_page: {count} pages from {base}, {holes} in holes, {reserved} reserved at boot, {} free",
            table.free_count()
        );

        Ok(Self {
            pages: SpinMutex::new(table),
            mapper,
            config,
            trimming: AtomicBool::new(false),
            scrubber_stats: ScrubberStats::default(),
            pageout_stats: PageoutStats::default(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &VmPageConfig {
        &self.config
    }

    /// Take the page lock with interrupts disabled.
    fn lock(&self) -> IrqMutexGuard<'_, PageTable> {
        self.pages.lock_irq()
    }

    fn range_index(
        table: &PageTable,
        start: PhysicalPageNumber,
        len: usize,
    ) -> Result<PageIndex, VmPageError> {
        table
            .index_of(start)
            .filter(|&idx| idx.checked_add(len).is_some_and(|end| end <= table.len()))
            .ok_or(VmPageError::RangeOutOfBounds { start, len })
    }

    fn lookup_index(table: &PageTable, ppn: PhysicalPageNumber) -> Result<PageIndex, VmPageError> {
        table.index_of(ppn).ok_or(VmPageError::PageNotFound(ppn))
    }

    /// Zero a page the caller has claimed.
    fn zero_page(&self, ppn: PhysicalPageNumber) {
        // SAFETY: the page is Busy and owned by the caller.
        let mut page = unsafe { MappedPage::new(&self.mapper, ppn.base()) };
        page.zero();
    }

    fn exhausted(&self, requested: usize) -> Result<PhysicalPageNumber, VmPageError> {
        error!("vm_page: out of physical memory ({requested} page(s) requested)");
        match self.config.exhaustion_policy {
            ExhaustionPolicy::Halt => panic!("vm_page: out of physical memory"),
            ExhaustionPolicy::ReturnError => Err(VmPageError::OutOfPhysicalMemory { requested }),
        }
    }

    /// Allocate one page.
    ///
    /// A `Free` request prefers the Free queue and falls back to Clear; a
    /// `Clear` request does the opposite and zeroes the page if it came from
    /// the Free queue. The page is returned `Busy`.
    ///
    /// # Errors
    /// - [`VmPageError::InvalidRequestedState`] unless `state` is `Free` or `Clear`.
    /// - [`VmPageError::OutOfPhysicalMemory`] when both queues are empty and the
    ///   policy is [`ExhaustionPolicy::ReturnError`].
    ///
    /// # Panics
    /// When both queues are empty under [`ExhaustionPolicy::Halt`].
    pub fn allocate_page(&self, state: PageState) -> Result<PhysicalPageNumber, VmPageError> {
        let (primary, secondary) = match state {
            PageState::Free => (QueueKind::Free, QueueKind::Clear),
            PageState::Clear => (QueueKind::Clear, QueueKind::Free),
            other => return Err(VmPageError::InvalidRequestedState(other)),
        };

        let (ppn, old_state) = {
            let mut table = self.lock();
            let Some(idx) = table.dequeue(primary).or_else(|| table.dequeue(secondary)) else {
                drop(table);
                return self.exhausted(1);
            };
            let old_state = table.page(idx).state;
            table.page_mut(idx).state = PageState::Busy;
            table.enqueue(QueueKind::Active, idx);
            (table.ppn_of(idx), old_state)
        };

        if state == PageState::Clear && old_state != PageState::Clear {
            self.zero_page(ppn);
        }
        Ok(ppn)
    }

    /// Claim the page at `ppn` if it is `Free`, `Clear` or `Unused`.
    ///
    /// The page is returned `Busy`, zeroed first if `state` is `Clear` and
    /// the page was not already clear. Requests for any state other than
    /// `Free` or `Clear` get `None`.
    pub fn allocate_specific_page(
        &self,
        ppn: PhysicalPageNumber,
        state: PageState,
    ) -> Option<PhysicalPageNumber> {
        if !state.is_free() {
            warn!("vm_page: page {ppn} cannot be allocated as {state}");
            return None;
        }

        let old_state = {
            let mut table = self.lock();
            let idx = table.index_of(ppn)?;
            let old_state = table.page(idx).state;
            if !matches!(
                old_state,
                PageState::Free | PageState::Clear | PageState::Unused
            ) {
                return None;
            }
            table.set_state(idx, PageState::Busy);
            old_state
        };

        if state == PageState::Clear && old_state != PageState::Clear {
            self.zero_page(ppn);
        }
        Some(ppn)
    }

    /// Allocate `len` physically contiguous pages.
    ///
    /// Scans the table from the lowest page for a run of `Free`/`Clear`
    /// pages and claims it in the same lock hold. All pages are returned
    /// `Busy`; with a `Clear` request every page that was not clear is zeroed.
    /// On failure no page is touched.
    ///
    /// # Errors
    /// - [`VmPageError::InvalidRequestedState`] unless `state` is `Free` or `Clear`.
    /// - [`VmPageError::EmptyRun`] for `len == 0`.
    /// - [`VmPageError::OutOfPhysicalMemory`] if no run is free. Never panics,
    ///   whatever the exhaustion policy.
    pub fn allocate_page_run(
        &self,
        state: PageState,
        len: usize,
    ) -> Result<PhysicalPageNumber, VmPageError> {
        if !state.is_free() {
            return Err(VmPageError::InvalidRequestedState(state));
        }
        if len == 0 {
            return Err(VmPageError::EmptyRun);
        }
        // The table never changes size; this also bounds the buffer below.
        if len > self.num_pages() {
            debug!("vm_page: run of {len} page(s) exceeds the page table");
            return Err(VmPageError::OutOfPhysicalMemory { requested: len });
        }

        let mut to_zero = Vec::with_capacity(if state == PageState::Clear { len } else { 0 });
        let first = {
            let mut table = self.lock();
            let Some(start) = table.find_free_run(len) else {
                drop(table);
                debug!("vm_page: no free run of {len} page(s)");
                return Err(VmPageError::OutOfPhysicalMemory { requested: len });
            };
            for idx in start..start + len {
                if state == PageState::Clear && table.page(idx).state != PageState::Clear {
                    to_zero.push(table.ppn_of(idx));
                }
                table.set_state(idx, PageState::Busy);
            }
            table.ppn_of(start)
        };

        for ppn in to_zero {
            self.zero_page(ppn);
        }
        debug!("vm_page: claimed run of {len} page(s) at {first}");
        Ok(first)
    }

    /// Move a page to `state`, relinking it onto the matching queue.
    ///
    /// Setting the state a page already has is a no-op. Freeing a page
    /// (`Free`/`Clear`) also drops its cache association.
    ///
    /// # Errors
    /// - [`VmPageError::PageNotFound`] for a page outside the table.
    /// - [`VmPageError::PageReferenced`] when freeing a page that is still
    ///   referenced.
    pub fn set_page_state(
        &self,
        ppn: PhysicalPageNumber,
        state: PageState,
    ) -> Result<(), VmPageError> {
        let mut table = self.lock();
        let idx = Self::lookup_index(&table, ppn)?;
        if state.is_free() {
            let page = table.page_mut(idx);
            if page.ref_count > 0 {
                return Err(VmPageError::PageReferenced(ppn));
            }
            page.cache = None;
            page.cache_offset = 0;
        }
        table.set_state(idx, state);
        Ok(())
    }

    /// Snapshot of the descriptor for `ppn`.
    #[must_use]
    pub fn lookup_page(&self, ppn: PhysicalPageNumber) -> Option<PageInfo> {
        let table = self.lock();
        table.index_of(ppn).map(|idx| table.page(idx).info())
    }

    /// Number of descriptors in the page table.
    #[must_use]
    pub fn num_pages(&self) -> usize {
        self.lock().len()
    }

    /// Pages on the Free and Clear queues.
    #[must_use]
    pub fn num_free_pages(&self) -> usize {
        self.lock().free_count()
    }

    #[must_use]
    pub fn queue_len(&self, kind: QueueKind) -> usize {
        self.lock().queue(kind).len()
    }

    /// PPNs on `kind`, head to tail.
    #[must_use]
    pub fn queue_pages(&self, kind: QueueKind) -> Vec<PhysicalPageNumber> {
        // Sized before taking the lock; the queue may still grow meanwhile.
        let mut out = Vec::with_capacity(self.queue_len(kind) + 16);
        let table = self.lock();
        out.extend(
            table
                .queue(kind)
                .iter(table.pages())
                .map(|idx| table.ppn_of(idx)),
        );
        out
    }

    /// Reserve a single page. See [`mark_page_range_in_use`](Self::mark_page_range_in_use).
    ///
    /// # Errors
    /// [`VmPageError::RangeOutOfBounds`] if the page is outside the table.
    pub fn mark_page_in_use(&self, ppn: PhysicalPageNumber) -> Result<usize, VmPageError> {
        self.mark_page_range_in_use(ppn, 1)
    }

    /// Reserve `[start, start + len)`.
    ///
    /// `Free`/`Clear` pages become `Unused`, `Wired` pages are left alone, and
    /// pages in any other state are logged as an inconsistency and skipped.
    /// Returns how many pages were reserved.
    ///
    /// # Errors
    /// [`VmPageError::RangeOutOfBounds`] if any part of the range is outside
    /// the table; nothing is reserved then.
    pub fn mark_page_range_in_use(
        &self,
        start: PhysicalPageNumber,
        len: usize,
    ) -> Result<usize, VmPageError> {
        let mut table = self.lock();
        let idx = Self::range_index(&table, start, len).inspect_err(|e| warn!("vm_page: {e}"))?;
        Ok(table.mark_range_in_use(idx, len))
    }

    /// Take a reference on an in-use page; returns the new count.
    ///
    /// # Errors
    /// [`VmPageError::PageNotFound`], or [`VmPageError::PageNotInUse`] for a
    /// `Free`/`Clear` page.
    pub fn reference_page(&self, ppn: PhysicalPageNumber) -> Result<u32, VmPageError> {
        let mut table = self.lock();
        let idx = Self::lookup_index(&table, ppn)?;
        let page = table.page_mut(idx);
        if page.state.is_free() {
            return Err(VmPageError::PageNotInUse(ppn));
        }
        page.ref_count += 1;
        Ok(page.ref_count)
    }

    /// Drop a reference; returns the new count.
    ///
    /// # Errors
    /// [`VmPageError::PageNotFound`].
    pub fn unreference_page(&self, ppn: PhysicalPageNumber) -> Result<u32, VmPageError> {
        let mut table = self.lock();
        let idx = Self::lookup_index(&table, ppn)?;
        let page = table.page_mut(idx);
        if page.ref_count == 0 {
            warn!("vm_page: unbalanced unreference of page {ppn}");
        } else {
            page.ref_count -= 1;
        }
        Ok(page.ref_count)
    }

    /// Record that `ppn` holds the data at `offset` of `cache`.
    ///
    /// Only a weak reference is kept; the pageout daemon skips pages whose
    /// cache has gone away.
    ///
    /// # Errors
    /// [`VmPageError::PageNotFound`], or [`VmPageError::PageNotInUse`] for a
    /// `Free`/`Clear` page.
    pub fn attach_cache(
        &self,
        ppn: PhysicalPageNumber,
        cache: &Arc<dyn Cache>,
        offset: u64,
    ) -> Result<(), VmPageError> {
        let weak = Arc::downgrade(cache);
        let mut table = self.lock();
        let idx = Self::lookup_index(&table, ppn)?;
        let page = table.page_mut(idx);
        if page.state.is_free() {
            return Err(VmPageError::PageNotInUse(ppn));
        }
        page.cache = Some(weak);
        page.cache_offset = offset;
        Ok(())
    }

    /// Forget the cache association of `ppn`.
    ///
    /// # Errors
    /// [`VmPageError::PageNotFound`].
    pub fn detach_cache(&self, ppn: PhysicalPageNumber) -> Result<(), VmPageError> {
        let old = {
            let mut table = self.lock();
            let idx = Self::lookup_index(&table, ppn)?;
            let page = table.page_mut(idx);
            page.cache_offset = 0;
            page.cache.take()
        };
        // The weak reference may free the cache allocation; not under the lock.
        drop(old);
        Ok(())
    }

    /// Mark the start or end of a memory-pressure cycle.
    ///
    /// While set, the pageout daemon also writes pages of temporary stores.
    pub fn set_trimming(&self, trimming: bool) {
        self.trimming.store(trimming, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_trimming(&self) -> bool {
        self.trimming.load(Ordering::Relaxed)
    }

    /// Start the background daemons; needs working kernel threads.
    ///
    /// The scrubber always runs, at the lowest priority. The pageout daemon
    /// only starts if [`VmPageConfig::pageout_daemon`] is set.
    ///
    /// The pageout daemon sleeps on a scheduler semaphore that the page table
    /// releases whenever the Modified queue becomes non-empty.
    ///
    /// # Errors
    /// [`VmPageError::Spawn`] if a thread or the semaphore could not be
    /// created.
    pub fn start_daemons(self: &Arc<Self>, threads: &Arc<dyn KernelThreads>) -> Result<(), VmPageError>
    where
        M: Send + Sync + 'static,
    {
        let (pages, t) = (Arc::clone(self), Arc::clone(threads));
        threads.spawn(
            "page scrubber",
            ThreadPriority::Lowest,
            Box::new(move || pages.run_scrubber(&*t)),
        )?;
        info!("vm_page: scrubber started");

        if self.config.pageout_daemon {
            let modified = threads.create_semaphore("modified pages")?;
            self.lock().set_modified_signal(Arc::clone(&modified));
            let (pages, t) = (Arc::clone(self), Arc::clone(threads));
            threads.spawn(
                "pageout daemon",
                ThreadPriority::Normal,
                Box::new(move || pages.run_pageout(&*t, &*modified)),
            )?;
            info!("vm_page: pageout daemon started");
        } else {
            info!("vm_page: pageout daemon dormant");
        }
        Ok(())
    }
}
