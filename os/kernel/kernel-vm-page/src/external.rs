//! Contracts of the subsystems the page allocator works with but does not own.
//!
//! | Trait | Provided by |
//! |-------|-------------|
//! | [`PhysicalPageMapper`] | transient physical page mappings (HHDM, map window) |
//! | [`TranslationMap`] | per-address-space page tables |
//! | [`Cache`] / [`BackingStore`] | cache objects and their persistent store |
//! | [`KernelThreads`] / [`WaitSemaphore`] | the scheduler |
//! | [`DebuggerCommands`] | the kernel debugger console |

use crate::error::{SpawnError, StoreError};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;
use kernel_memory_addresses::{PAGE_SIZE_USIZE, PhysicalAddress, VirtualAddress};

/// Makes a physical page temporarily addressable.
///
/// # Safety
/// Implementors guarantee that the address returned by
/// [`get_physical_page`](Self::get_physical_page) maps the full page at `pa`
/// readable and writable until the matching
/// [`put_physical_page`](Self::put_physical_page).
pub unsafe trait PhysicalPageMapper {
    /// Map the page containing `pa` and return its virtual address.
    fn get_physical_page(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Release a mapping obtained from [`get_physical_page`](Self::get_physical_page).
    fn put_physical_page(&self, va: VirtualAddress);
}

// SAFETY: forwards to the shared mapper.
unsafe impl<M: PhysicalPageMapper + ?Sized> PhysicalPageMapper for Arc<M> {
    fn get_physical_page(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).get_physical_page(pa)
    }

    fn put_physical_page(&self, va: VirtualAddress) {
        (**self).put_physical_page(va);
    }
}

/// A transient mapping of one physical page; released on drop.
pub struct MappedPage<'a, M: PhysicalPageMapper + ?Sized> {
    mapper: &'a M,
    va: VirtualAddress,
}

impl<'a, M: PhysicalPageMapper + ?Sized> MappedPage<'a, M> {
    /// Map the page at `pa`.
    ///
    /// # Safety
    /// The caller must own the page exclusively (it is `Busy` and claimed by
    /// the caller) for the lifetime of the mapping.
    pub unsafe fn new(mapper: &'a M, pa: PhysicalAddress) -> Self {
        let va = mapper.get_physical_page(pa);
        Self { mapper, va }
    }

    #[must_use]
    pub const fn address(&self) -> VirtualAddress {
        self.va
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: mapped for PAGE_SIZE bytes until drop; exclusive per `new`.
        unsafe { core::slice::from_raw_parts(self.va.as_mut_ptr::<u8>(), PAGE_SIZE_USIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this the only view.
        unsafe { core::slice::from_raw_parts_mut(self.va.as_mut_ptr::<u8>(), PAGE_SIZE_USIZE) }
    }

    /// Fill the page with zeros.
    pub fn zero(&mut self) {
        // SAFETY: as above.
        unsafe { core::ptr::write_bytes(self.va.as_mut_ptr::<u8>(), 0, PAGE_SIZE_USIZE) }
    }
}

impl<M: PhysicalPageMapper + ?Sized> Drop for MappedPage<'_, M> {
    fn drop(&mut self) {
        self.mapper.put_physical_page(self.va);
    }
}

/// The page tables of one address space.
pub trait TranslationMap: Send + Sync {
    fn lock(&self);
    fn unlock(&self);

    /// Clear the hardware modified (dirty) bit of the mapping at `va`.
    ///
    /// Called with the map locked.
    fn clear_modified(&self, va: VirtualAddress);
}

/// Holds a [`TranslationMap`] locked; unlocks on drop.
pub struct TranslationMapGuard<'a> {
    map: &'a dyn TranslationMap,
}

impl<'a> TranslationMapGuard<'a> {
    pub fn lock(map: &'a dyn TranslationMap) -> Self {
        map.lock();
        Self { map }
    }

    pub fn clear_modified(&self, va: VirtualAddress) {
        self.map.clear_modified(va);
    }
}

impl Drop for TranslationMapGuard<'_> {
    fn drop(&mut self) {
        self.map.unlock();
    }
}

/// A region mapping part of a cache into some address space.
#[derive(Copy, Clone)]
pub struct RegionMapping<'a> {
    /// Virtual address of the region's first page.
    pub base: VirtualAddress,
    pub size: u64,
    /// Offset within the cache that `base` maps.
    pub cache_offset: u64,
    pub translation_map: &'a dyn TranslationMap,
}

impl RegionMapping<'_> {
    /// Where the cache page at `offset` is mapped in this region, if it is.
    #[must_use]
    pub fn address_of(&self, offset: u64) -> Option<VirtualAddress> {
        let delta = offset.checked_sub(self.cache_offset)?;
        (delta < self.size).then(|| self.base + delta)
    }
}

/// Persistent store behind a cache.
pub trait BackingStore: Send + Sync {
    /// Whether the contents are discarded on reboot (anonymous memory,
    /// swap-less scratch stores).
    fn is_temporary(&self) -> bool;

    /// Write the buffers back to back, starting at `offset`.
    ///
    /// # Errors
    /// Store specific.
    fn write(&self, offset: u64, buffers: &[&[u8]]) -> Result<usize, StoreError>;
}

/// A cache object owning a set of pages.
///
/// [`acquire_ref`](Self::acquire_ref) may be called with the page lock held
/// and must not block.
pub trait Cache: Send + Sync {
    /// Take a reference. `force` takes it even while the cache is being torn
    /// down.
    fn acquire_ref(&self, force: bool);
    fn release_ref(&self);

    fn store(&self) -> &dyn BackingStore;

    /// Visit every region currently mapping this cache.
    fn for_each_region(&self, f: &mut dyn FnMut(&RegionMapping<'_>));
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadPriority {
    Lowest,
    Normal,
    Highest,
}

/// Counting semaphore whose waiters sleep in the scheduler.
pub trait WaitSemaphore: Send + Sync {
    /// Add one count and make a waiter runnable.
    ///
    /// Called with the page lock held and interrupts disabled; must neither
    /// block nor reschedule.
    fn release(&self);

    /// Take one count, sleeping until one is available.
    fn acquire(&self);

    /// Take one count if one is available right now.
    fn try_acquire(&self) -> bool;
}

/// Kernel thread services used by the daemons.
pub trait KernelThreads: Send + Sync {
    /// Create and start a kernel thread running `entry`.
    ///
    /// # Errors
    /// [`SpawnError`] if the thread could not be created.
    fn spawn(
        &self,
        name: &'static str,
        priority: ThreadPriority,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<(), SpawnError>;

    /// Create a semaphore with a count of zero.
    ///
    /// # Errors
    /// [`SpawnError`] if the scheduler is out of semaphores.
    fn create_semaphore(&self, name: &'static str) -> Result<Arc<dyn WaitSemaphore>, SpawnError>;

    /// Sleep the calling thread.
    fn snooze(&self, duration: Duration);
}

/// Output-only debugger command handler.
pub type DebuggerCommand = Box<dyn Fn(&mut dyn fmt::Write) -> fmt::Result + Send + Sync>;

/// The kernel debugger's command registry.
pub trait DebuggerCommands {
    fn add_command(&self, name: &'static str, help: &'static str, command: DebuggerCommand);
}
