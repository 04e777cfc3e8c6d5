//! The pageout daemon: writes Modified pages back to their cache's store.
//!
//! Per page:
//!
//! 1. claim the tail of the Modified queue (`Busy`) and take a reference on
//!    its cache while still holding the page lock,
//! 2. a page of a temporary store goes straight back onto the Modified queue
//!    unless a trim cycle is running,
//! 3. otherwise clear the hardware modified bit in every region mapping the
//!    page, write it at its cache offset, and settle it as `Active` (still
//!    referenced) or `Inactive`,
//! 4. drop the cache reference.
//!
//! Write errors are counted and otherwise dropped; the page is not retried.

use crate::error::StoreError;
use crate::external::{
    Cache, KernelThreads, MappedPage, PhysicalPageMapper, TranslationMapGuard, WaitSemaphore,
};
use crate::queue::PageIndex;
use crate::table::PageTable;
use crate::{PageState, QueueKind, VmPages};
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::PhysicalPageNumber;
use log::{debug, warn};

/// Pageout statistics
#[derive(Debug, Default)]
pub struct PageoutStats {
    /// Daemon wakeups
    pub wakeups: AtomicU64,
    /// Pages written back successfully
    pub written: AtomicU64,
    /// Pages the store refused
    pub write_errors: AtomicU64,
    /// Temporary-store pages put back on the Modified queue
    pub skipped_temporary: AtomicU64,
    /// Modified pages whose cache was already gone
    pub orphaned: AtomicU64,
}

/// Outcome of one [`VmPages::pageout_once`] call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageoutStep {
    /// The Modified queue was empty.
    Idle,
    /// Temporary store outside a trim cycle; the page is Modified again.
    Requeued(PhysicalPageNumber),
    /// The owning cache is gone; the page was settled without a write.
    Orphaned(PhysicalPageNumber),
    Written(PhysicalPageNumber),
    /// The store refused the write; the page was settled anyway.
    WriteFailed(PhysicalPageNumber, StoreError),
}

/// A Modified page claimed for write-back.
struct Claim {
    idx: PageIndex,
    ppn: PhysicalPageNumber,
    offset: u64,
    cache: Arc<dyn Cache>,
}

/// State of a page after write-back.
const fn settled_state(ref_count: u32) -> PageState {
    if ref_count > 0 {
        PageState::Active
    } else {
        PageState::Inactive
    }
}

impl<M: PhysicalPageMapper> VmPages<M> {
    /// Claim `idx` (which must be Modified) for write-back.
    ///
    /// Runs under the page lock. Returns `None` and settles the page if its
    /// cache is gone.
    fn claim(&self, table: &mut PageTable, idx: PageIndex) -> Option<Claim> {
        table.set_state(idx, PageState::Busy);
        let page = table.page(idx);
        let (ppn, offset, ref_count) = (page.ppn, page.cache_offset, page.ref_count);

        if let Some(cache) = page.cache.as_ref().and_then(Weak::upgrade) {
            cache.acquire_ref(true);
            return Some(Claim {
                idx,
                ppn,
                offset,
                cache,
            });
        }

        table.set_state(idx, settled_state(ref_count));
        self.pageout_stats.orphaned.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Process the tail of the Modified queue.
    pub fn pageout_once(&self) -> PageoutStep {
        let claim = {
            let mut table = self.lock();
            let Some(idx) = table.queue(QueueKind::Modified).tail() else {
                return PageoutStep::Idle;
            };
            match self.claim(&mut table, idx) {
                Some(claim) => claim,
                None => {
                    let ppn = table.ppn_of(idx);
                    drop(table);
                    warn!("vm_page: modified page {ppn} has no cache");
                    return PageoutStep::Orphaned(ppn);
                }
            }
        };

        if claim.cache.store().is_temporary() && !self.is_trimming() {
            self.lock().set_state(claim.idx, PageState::Modified);
            claim.cache.release_ref();
            self.pageout_stats
                .skipped_temporary
                .fetch_add(1, Ordering::Relaxed);
            return PageoutStep::Requeued(claim.ppn);
        }

        self.write_back(&claim)
    }

    fn write_back(&self, claim: &Claim) -> PageoutStep {
        claim.cache.for_each_region(&mut |region| {
            if let Some(va) = region.address_of(claim.offset) {
                TranslationMapGuard::lock(region.translation_map).clear_modified(va);
            }
        });

        let result = {
            // SAFETY: the page is Busy and claimed by this write-back.
            let page = unsafe { MappedPage::new(&self.mapper, claim.ppn.base()) };
            claim.cache.store().write(claim.offset, &[page.as_bytes()])
        };

        {
            let mut table = self.lock();
            let state = settled_state(table.page(claim.idx).ref_count);
            table.set_state(claim.idx, state);
        }
        claim.cache.release_ref();

        match result {
            Ok(bytes) => {
                self.pageout_stats.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "vm_page: wrote page {} ({bytes} bytes at {:#x})",
                    claim.ppn, claim.offset
                );
                PageoutStep::Written(claim.ppn)
            }
            Err(e) => {
                self.pageout_stats.write_errors.fetch_add(1, Ordering::Relaxed);
                debug!("vm_page: writing page {} failed: {e}", claim.ppn);
                PageoutStep::WriteFailed(claim.ppn, e)
            }
        }
    }

    /// Write back every Modified page of `cache` now, temporary store or not.
    ///
    /// Returns the number of pages written successfully.
    pub fn write_modified(&self, cache: &Arc<dyn Cache>) -> usize {
        let target = Arc::downgrade(cache);
        let mut written = 0;
        loop {
            let claim = {
                let mut table = self.lock();
                let found = table
                    .queue(QueueKind::Modified)
                    .iter(table.pages())
                    .find(|&idx| {
                        table
                            .page(idx)
                            .cache
                            .as_ref()
                            .is_some_and(|w| w.ptr_eq(&target))
                    });
                let Some(idx) = found else { break };
                self.claim(&mut table, idx)
            };
            if let Some(claim) = claim
                && matches!(self.write_back(&claim), PageoutStep::Written(_))
            {
                written += 1;
            }
        }
        debug!("vm_page: flushed {written} page(s) of one cache");
        written
    }

    #[must_use]
    pub const fn pageout_stats(&self) -> &PageoutStats {
        &self.pageout_stats
    }

    /// Pageout thread body; never returns.
    ///
    /// Sleeps on `modified` until the Modified queue becomes non-empty, then
    /// keeps processing until it is empty again.
    pub(crate) fn run_pageout(&self, threads: &dyn KernelThreads, modified: &dyn WaitSemaphore) {
        loop {
            modified.acquire();
            self.pageout_stats.wakeups.fetch_add(1, Ordering::Relaxed);

            loop {
                let pending = self.queue_len(QueueKind::Modified);
                let progressed = (0..pending)
                    .map(|_| self.pageout_once())
                    .filter(|step| !matches!(step, PageoutStep::Requeued(_) | PageoutStep::Idle))
                    .count();

                // A requeued page that was alone on the queue released the
                // semaphore again; that count carries no new work.
                while modified.try_acquire() {}
                if self.queue_len(QueueKind::Modified) == 0 {
                    break;
                }
                if progressed == 0 {
                    threads.snooze(self.config.pageout_retry_interval);
                }
            }
        }
    }
}
