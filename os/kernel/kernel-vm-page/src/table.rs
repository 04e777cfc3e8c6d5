//! The page table: every page descriptor plus the four queues.
//!
//! Everything here runs under the page lock held by [`VmPages`](crate::VmPages).

use crate::external::WaitSemaphore;
use crate::page::{PageState, VmPage};
use crate::queue::{PageIndex, PageQueue, QueueKind};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPageNumber;
use log::error;

pub(crate) struct PageTable {
    pages: Box<[VmPage]>,
    queues: [PageQueue; 4],
    /// PPN of `pages[0]`.
    base: PhysicalPageNumber,
    /// Released whenever the Modified queue becomes non-empty; unset until
    /// the pageout daemon runs.
    modified_signal: Option<Arc<dyn WaitSemaphore>>,
}

impl PageTable {
    /// Build `count` descriptors starting at `base`, all `Free` and queued on
    /// the Free queue so that the lowest page is handed out first.
    pub fn new(base: PhysicalPageNumber, count: usize) -> Self {
        let pages: Box<[VmPage]> = (0..count as u64).map(|i| VmPage::new(base + i)).collect();
        let mut table = Self {
            pages,
            queues: [
                PageQueue::new(),
                PageQueue::new(),
                PageQueue::new(),
                PageQueue::new(),
            ],
            base,
            modified_signal: None,
        };
        for idx in 0..count {
            table.enqueue(QueueKind::Free, idx);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub const fn base(&self) -> PhysicalPageNumber {
        self.base
    }

    pub fn index_of(&self, ppn: PhysicalPageNumber) -> Option<PageIndex> {
        let offset = ppn.checked_offset_from(self.base)?;
        let idx = usize::try_from(offset).ok()?;
        (idx < self.pages.len()).then_some(idx)
    }

    pub fn page(&self, idx: PageIndex) -> &VmPage {
        &self.pages[idx]
    }

    pub fn page_mut(&mut self, idx: PageIndex) -> &mut VmPage {
        &mut self.pages[idx]
    }

    pub fn pages(&self) -> &[VmPage] {
        &self.pages
    }

    pub fn queue(&self, kind: QueueKind) -> &PageQueue {
        &self.queues[kind.index()]
    }

    pub fn free_count(&self) -> usize {
        self.queue(QueueKind::Free).len() + self.queue(QueueKind::Clear).len()
    }

    /// Push `idx` at the head of `kind`.
    pub fn enqueue(&mut self, kind: QueueKind, idx: PageIndex) {
        let queue = &mut self.queues[kind.index()];
        queue.push_front(&mut self.pages, idx);
        if kind == QueueKind::Modified
            && queue.len() == 1
            && let Some(signal) = &self.modified_signal
        {
            signal.release();
        }
    }

    /// Release `signal` on every empty to non-empty transition of the
    /// Modified queue from now on, and once right away if pages are already
    /// waiting there.
    pub fn set_modified_signal(&mut self, signal: Arc<dyn WaitSemaphore>) {
        if !self.queue(QueueKind::Modified).is_empty() {
            signal.release();
        }
        self.modified_signal = Some(signal);
    }

    /// Pop the tail of `kind`.
    pub fn dequeue(&mut self, kind: QueueKind) -> Option<PageIndex> {
        self.queues[kind.index()].pop_back(&mut self.pages)
    }

    fn move_to_queue(&mut self, from: QueueKind, to: QueueKind, idx: PageIndex) {
        if from != to {
            self.queues[from.index()].remove(&mut self.pages, idx);
            self.enqueue(to, idx);
        }
    }

    /// Move `idx` to the queue of `state` and assign the state.
    ///
    /// A page that stays within the same queue is not relinked.
    pub fn set_state(&mut self, idx: PageIndex, state: PageState) {
        let from = self.pages[idx].state.queue();
        self.move_to_queue(from, state.queue(), idx);
        self.pages[idx].state = state;
    }

    /// Reserve `[start, start + len)`: `Free`/`Clear` become `Unused`,
    /// `Wired` stays, anything else is reported and skipped. The range is
    /// clipped to the table.
    ///
    /// Returns the number of pages reserved.
    pub fn mark_range_in_use(&mut self, start: PageIndex, len: usize) -> usize {
        let end = start.saturating_add(len).min(self.pages.len());
        let mut reserved = 0;
        for idx in start..end {
            match self.pages[idx].state {
                PageState::Free | PageState::Clear => {
                    self.set_state(idx, PageState::Unused);
                    reserved += 1;
                }
                PageState::Wired => {}
                state => error!(
                    "vm_page: reserving page {} in non-free state {state}",
                    self.pages[idx].ppn
                ),
            }
        }
        reserved
    }

    /// First index of `len` consecutive `Free`/`Clear` pages.
    pub fn find_free_run(&self, len: usize) -> Option<PageIndex> {
        let mut start: PageIndex = 0;
        while let Some(end) = start.checked_add(len)
            && end <= self.pages.len()
        {
            match (start..end).rfind(|&i| !self.pages[i].state.is_free()) {
                Some(blocker) => start = blocker + 1,
                None => return Some(start),
            }
        }
        None
    }

    /// Members of `kind` from head to tail.
    pub fn queue_members(&self, kind: QueueKind) -> Vec<PageIndex> {
        self.queue(kind).iter(&self.pages).collect()
    }

    pub fn ppn_of(&self, idx: PageIndex) -> PhysicalPageNumber {
        self.pages[idx].ppn
    }
}
