//! The page scrubber: turns Free pages into Clear (zero-filled) pages in the
//! background, so `Clear` allocations rarely have to zero on the spot.

use crate::external::{KernelThreads, PhysicalPageMapper};
use crate::{PageState, QueueKind, VmPages};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use log::debug;

/// Scrubber statistics
#[derive(Debug, Default)]
pub struct ScrubberStats {
    /// Wake-ups that found free pages to scrub
    pub batches: AtomicU64,
    /// Pages zeroed and moved to the Clear queue
    pub scrubbed: AtomicU64,
}

impl<M: PhysicalPageMapper> VmPages<M> {
    /// Zero up to [`scrub_batch`](crate::VmPageConfig::scrub_batch) pages
    /// from the tail of the Free queue and push them onto the Clear queue.
    ///
    /// The batch is marked `Busy` while it is being zeroed outside the page
    /// lock. Returns the number of pages scrubbed.
    pub fn scrub_once(&self) -> usize {
        let mut batch = Vec::with_capacity(self.config.scrub_batch);
        {
            let mut table = self.lock();
            while batch.len() < self.config.scrub_batch {
                let Some(idx) = table.queue(QueueKind::Free).tail() else {
                    break;
                };
                table.set_state(idx, PageState::Busy);
                batch.push((idx, table.ppn_of(idx)));
            }
        }
        if batch.is_empty() {
            return 0;
        }

        for &(_, ppn) in &batch {
            self.zero_page(ppn);
        }

        {
            let mut table = self.lock();
            for &(idx, _) in &batch {
                table.set_state(idx, PageState::Clear);
            }
        }

        self.scrubber_stats.batches.fetch_add(1, Ordering::Relaxed);
        self.scrubber_stats
            .scrubbed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        debug!("vm_page: scrubbed {} page(s)", batch.len());
        batch.len()
    }

    #[must_use]
    pub const fn scrubber_stats(&self) -> &ScrubberStats {
        &self.scrubber_stats
    }

    /// Scrubber thread body; never returns.
    pub(crate) fn run_scrubber(&self, threads: &dyn KernelThreads) {
        loop {
            threads.snooze(self.config.scrub_interval);
            if self.queue_len(QueueKind::Free) > 0 {
                self.scrub_once();
            }
        }
    }
}
