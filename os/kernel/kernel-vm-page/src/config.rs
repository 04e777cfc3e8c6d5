//! Runtime tunables of the page allocator.

use core::time::Duration;

/// How often the scrubber wakes up to zero free pages.
pub const SCRUB_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of pages the scrubber claims per wake-up.
pub const SCRUB_BATCH: usize = 16;

/// How long the pageout daemon backs off after a pass in which every page
/// went straight back onto the Modified queue.
pub const PAGEOUT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// What [`VmPages::allocate_page`](crate::VmPages::allocate_page) does when
/// both the Free and the Clear queue are empty.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ExhaustionPolicy {
    /// Panic. Callers of single-page allocation historically never check
    /// for failure.
    #[default]
    Halt,
    /// Return [`VmPageError::OutOfPhysicalMemory`](crate::VmPageError::OutOfPhysicalMemory).
    ReturnError,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VmPageConfig {
    pub exhaustion_policy: ExhaustionPolicy,
    pub scrub_interval: Duration,
    pub scrub_batch: usize,
    pub pageout_retry_interval: Duration,
    /// Start the pageout daemon from
    /// [`VmPages::start_daemons`](crate::VmPages::start_daemons).
    ///
    /// Defaults to the `pageout-daemon` cargo feature.
    pub pageout_daemon: bool,
}

impl Default for VmPageConfig {
    fn default() -> Self {
        Self {
            exhaustion_policy: ExhaustionPolicy::Halt,
            scrub_interval: SCRUB_INTERVAL,
            scrub_batch: SCRUB_BATCH,
            pageout_retry_interval: PAGEOUT_RETRY_INTERVAL,
            pageout_daemon: cfg!(feature = "pageout-daemon"),
        }
    }
}

impl VmPageConfig {
    #[must_use]
    pub const fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_scrub_interval(mut self, interval: Duration) -> Self {
        self.scrub_interval = interval;
        self
    }

    /// A batch of zero is treated as one page.
    #[must_use]
    pub const fn with_scrub_batch(mut self, batch: usize) -> Self {
        self.scrub_batch = if batch == 0 { 1 } else { batch };
        self
    }

    #[must_use]
    pub const fn with_pageout_retry_interval(mut self, interval: Duration) -> Self {
        self.pageout_retry_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_pageout_daemon(mut self, enabled: bool) -> Self {
        self.pageout_daemon = enabled;
        self
    }
}
