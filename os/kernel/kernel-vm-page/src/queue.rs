//! Index-linked page queues.
//!
//! Pages live in one arena (the page table); a queue only stores the indices
//! of its head and tail plus a count, and each page carries its own
//! `prev`/`next` links. Pushing at the head, popping at the tail and removing
//! a known member are all O(1).
//!
//! ```text
//!   head                                   tail
//!    │                                      │
//!    ▼                                      ▼
//!  ┌────┐ next ┌────┐ next ┌────┐ next ┌────┐
//!  │ 12 │─────>│ 40 │─────>│  3 │─────>│  7 │
//!  │    │<─────│    │<─────│    │<─────│    │
//!  └────┘ prev └────┘ prev └────┘ prev └────┘
//!    ^ push_front                 pop_back ^
//! ```
//!
//! None of these helpers lock anything; callers hold the page lock.

use core::fmt;

/// Position of a page in the page table.
pub(crate) type PageIndex = usize;

/// The four page queues.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueueKind {
    Free,
    Clear,
    Modified,
    Active,
}

impl QueueKind {
    pub const ALL: [Self; 4] = [Self::Free, Self::Clear, Self::Modified, Self::Active];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Clear => "clear",
            Self::Modified => "modified",
            Self::Active => "active",
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Intrusive links of a queued page.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub(crate) struct QueueLinks {
    pub prev: Option<PageIndex>,
    pub next: Option<PageIndex>,
}

impl QueueLinks {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }
}

/// Anything that can sit on a [`PageQueue`].
pub(crate) trait Linked {
    fn links(&self) -> &QueueLinks;
    fn links_mut(&mut self) -> &mut QueueLinks;
}

#[derive(Debug, Default)]
pub(crate) struct PageQueue {
    head: Option<PageIndex>,
    tail: Option<PageIndex>,
    count: usize,
}

impl PageQueue {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            count: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub const fn head(&self) -> Option<PageIndex> {
        self.head
    }

    pub const fn tail(&self) -> Option<PageIndex> {
        self.tail
    }

    /// Link `idx` in as the new head.
    ///
    /// `idx` must not be on any queue.
    pub fn push_front<N: Linked>(&mut self, nodes: &mut [N], idx: PageIndex) {
        debug_assert_eq!(*nodes[idx].links(), QueueLinks::new());
        *nodes[idx].links_mut() = QueueLinks {
            prev: None,
            next: self.head,
        };
        match self.head {
            Some(old) => nodes[old].links_mut().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.count += 1;
    }

    /// Unlink and return the tail.
    pub fn pop_back<N: Linked>(&mut self, nodes: &mut [N]) -> Option<PageIndex> {
        let idx = self.tail?;
        self.remove(nodes, idx);
        Some(idx)
    }

    /// Unlink `idx`, which must be a member of this queue.
    pub fn remove<N: Linked>(&mut self, nodes: &mut [N], idx: PageIndex) {
        let QueueLinks { prev, next } = *nodes[idx].links();
        match prev {
            Some(p) => nodes[p].links_mut().next = next,
            None => {
                debug_assert_eq!(self.head, Some(idx));
                self.head = next;
            }
        }
        match next {
            Some(n) => nodes[n].links_mut().prev = prev,
            None => {
                debug_assert_eq!(self.tail, Some(idx));
                self.tail = prev;
            }
        }
        *nodes[idx].links_mut() = QueueLinks::new();
        self.count -= 1;
    }

    /// Members from head to tail.
    pub fn iter<'a, N: Linked>(&self, nodes: &'a [N]) -> impl Iterator<Item = PageIndex> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let idx = cursor?;
            cursor = nodes[idx].links().next;
            Some(idx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Node(QueueLinks);

    impl Linked for Node {
        fn links(&self) -> &QueueLinks {
            &self.0
        }
        fn links_mut(&mut self) -> &mut QueueLinks {
            &mut self.0
        }
    }

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|_| Node::default()).collect()
    }

    #[test]
    fn push_front_pop_back_is_fifo() {
        let mut nodes = nodes(4);
        let mut q = PageQueue::new();
        for i in 0..4 {
            q.push_front(&mut nodes, i);
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.iter(&nodes).collect::<Vec<_>>(), [3, 2, 1, 0]);

        assert_eq!(q.pop_back(&mut nodes), Some(0));
        assert_eq!(q.pop_back(&mut nodes), Some(1));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn remove_relinks_neighbors() {
        let mut nodes = nodes(5);
        let mut q = PageQueue::new();
        for i in 0..5 {
            q.push_front(&mut nodes, i);
        }

        q.remove(&mut nodes, 2);
        assert_eq!(q.iter(&nodes).collect::<Vec<_>>(), [4, 3, 1, 0]);
        assert_eq!(nodes[3].0.next, Some(1));
        assert_eq!(nodes[1].0.prev, Some(3));
        assert_eq!(nodes[2].0, QueueLinks::new());

        q.remove(&mut nodes, 4);
        q.remove(&mut nodes, 0);
        assert_eq!(q.head(), Some(3));
        assert_eq!(q.tail(), Some(1));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn draining_leaves_queue_empty() {
        let mut nodes = nodes(2);
        let mut q = PageQueue::new();
        q.push_front(&mut nodes, 0);
        q.push_front(&mut nodes, 1);

        assert!(q.pop_back(&mut nodes).is_some());
        assert!(q.pop_back(&mut nodes).is_some());
        assert!(q.pop_back(&mut nodes).is_none());
        assert!(q.is_empty());
        assert_eq!(q.head(), None);
        assert_eq!(q.tail(), None);
    }
}
