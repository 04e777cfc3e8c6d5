//! State histogram and the `page_stats` / `page_queues` debugger commands.

use crate::external::{DebuggerCommands, PhysicalPageMapper};
use crate::table::PageTable;
use crate::{PageState, QueueKind, VmPages};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

/// Page counts per state and per queue, taken in one lock hold.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PageStats {
    states: [usize; PageState::ALL.len()],
    queues: [usize; QueueKind::ALL.len()],
    total: usize,
}

impl PageStats {
    pub(crate) fn collect(table: &PageTable) -> Self {
        let mut stats = Self {
            total: table.len(),
            ..Self::default()
        };
        for page in table.pages() {
            stats.states[page.state.index()] += 1;
        }
        for kind in QueueKind::ALL {
            stats.queues[kind.index()] = table.queue(kind).len();
        }
        stats
    }

    #[must_use]
    pub const fn state(&self, state: PageState) -> usize {
        self.states[state.index()]
    }

    #[must_use]
    pub const fn queue(&self, kind: QueueKind) -> usize {
        self.queues[kind.index()]
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Pages on the Free and Clear queues.
    #[must_use]
    pub const fn free(&self) -> usize {
        self.queue(QueueKind::Free) + self.queue(QueueKind::Clear)
    }
}

impl fmt::Display for PageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page stats:")?;
        for state in PageState::ALL {
            writeln!(f, "{state}: {}", self.state(state))?;
        }
        write!(f, "total: {}", self.total)
    }
}

fn dump_queues(table: &PageTable, out: &mut dyn fmt::Write) -> fmt::Result {
    for kind in QueueKind::ALL {
        let queue = table.queue(kind);
        write!(out, "page {kind} queue: ")?;
        match (queue.head(), queue.tail()) {
            (Some(head), Some(tail)) => write!(
                out,
                "{} -> {}",
                table.ppn_of(head),
                table.ppn_of(tail)
            )?,
            _ => write!(out, "empty")?,
        }
        writeln!(out, ", count = {}", queue.len())?;
    }
    writeln!(
        out,
        "free pages: {} of {}",
        table.free_count(),
        table.len()
    )
}

const LOCK_HELD: &str = "page lock is held, try again\n";

impl<M: PhysicalPageMapper> VmPages<M> {
    #[must_use]
    pub fn page_stats(&self) -> PageStats {
        PageStats::collect(&self.lock())
    }

    /// Register `page_stats` and `page_queues` with the kernel debugger.
    ///
    /// The commands never wait for the page lock; if it is held they say so
    /// and return.
    pub fn register_debugger_commands(self: &Arc<Self>, debugger: &dyn DebuggerCommands)
    where
        M: Send + Sync + 'static,
    {
        let pages = Arc::clone(self);
        debugger.add_command(
            "page_stats",
            "dump statistics about page usage",
            Box::new(move |out: &mut dyn fmt::Write| match pages.pages.try_lock() {
                Some(table) => writeln!(out, "{}", PageStats::collect(&table)),
                None => out.write_str(LOCK_HELD),
            }),
        );

        let pages = Arc::clone(self);
        debugger.add_command(
            "page_queues",
            "dump info about the page queues",
            Box::new(move |out: &mut dyn fmt::Write| match pages.pages.try_lock() {
                Some(table) => dump_queues(&table, out),
                None => out.write_str(LOCK_HELD),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalPageNumber;

    #[test]
    fn stats_count_states_and_queues() {
        let mut table = PageTable::new(PhysicalPageNumber::new(0), 6);
        table.set_state(0, PageState::Wired);
        table.set_state(1, PageState::Modified);
        table.set_state(2, PageState::Clear);

        let stats = PageStats::collect(&table);
        assert_eq!(stats.total(), 6);
        assert_eq!(stats.state(PageState::Free), 3);
        assert_eq!(stats.state(PageState::Wired), 1);
        assert_eq!(stats.queue(QueueKind::Active), 1);
        assert_eq!(stats.queue(QueueKind::Modified), 1);
        assert_eq!(stats.free(), 4);
    }

    #[test]
    fn queue_dump_names_each_queue() {
        let mut table = PageTable::new(PhysicalPageNumber::new(0x10), 3);
        table.set_state(1, PageState::Active);

        let mut out = String::new();
        dump_queues(&table, &mut out).unwrap();
        assert!(out.contains("page free queue: 0x12 -> 0x10, count = 2"));
        assert!(out.contains("page clear queue: empty, count = 0"));
        assert!(out.contains("page active queue: 0x11 -> 0x11, count = 1"));
        assert!(out.ends_with("free pages: 2 of 3\n"));
    }
}
