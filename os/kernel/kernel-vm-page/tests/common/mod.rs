//! Fakes for the collaborators of the page allocator.

#![allow(dead_code)]

use kernel_info::boot::{AddressRange, BootMemoryMap, RangeList};
use kernel_memory_addresses::{
    PAGE_SIZE, PAGE_SIZE_USIZE, PhysicalAddress, PhysicalPageNumber, VirtualAddress,
};
use kernel_vm_page::external::{
    BackingStore, Cache, DebuggerCommand, DebuggerCommands, KernelThreads, PhysicalPageMapper,
    RegionMapping, ThreadPriority, TranslationMap, WaitSemaphore,
};
use kernel_vm_page::{PageState, QueueKind, SpawnError, StoreError, VmPageConfig, VmPages};
use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// First physical page of the fake machine.
pub const BASE_PPN: u64 = 0x100;

pub fn ppn(offset: u64) -> PhysicalPageNumber {
    PhysicalPageNumber::new(BASE_PPN + offset)
}

pub fn addr(offset: u64) -> u64 {
    ppn(offset).base().as_u64()
}

/// Boot map with ranges given in pages relative to [`BASE_PPN`].
pub fn boot_map(phys_mem: &[(u64, u64)], phys_alloc: &[(u64, u64)]) -> BootMemoryMap {
    let to_ranges = |pages: &[(u64, u64)]| {
        pages
            .iter()
            .map(|&(start, len)| AddressRange::new(addr(start), len * PAGE_SIZE))
            .collect::<Vec<_>>()
    };
    let mut map = BootMemoryMap::default();
    map.phys_mem = RangeList::from_slice(&to_ranges(phys_mem));
    map.phys_alloc = RangeList::from_slice(&to_ranges(phys_alloc));
    map
}

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE_USIZE]>);

/// Heap-backed physical memory starting at [`BASE_PPN`].
pub struct FakePhysMem {
    frames: Box<[Frame]>,
    maps: AtomicUsize,
    puts: AtomicUsize,
}

// SAFETY: frames are only touched through mappings of pages the allocator
// claimed, or by the test thread while no daemon runs.
unsafe impl Sync for FakePhysMem {}

impl FakePhysMem {
    /// `count` pages, all filled with a non-zero pattern.
    pub fn new(count: usize) -> Arc<Self> {
        let frames = (0..count)
            .map(|_| Frame(UnsafeCell::new([0xA5; PAGE_SIZE_USIZE])))
            .collect();
        Arc::new(Self {
            frames,
            maps: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        })
    }

    fn frame(&self, ppn: PhysicalPageNumber) -> *mut u8 {
        let idx = usize::try_from(ppn.as_u64() - BASE_PPN).unwrap();
        self.frames[idx].0.get().cast()
    }

    pub fn fill(&self, ppn: PhysicalPageNumber, byte: u8) {
        unsafe { std::ptr::write_bytes(self.frame(ppn), byte, PAGE_SIZE_USIZE) }
    }

    pub fn read(&self, ppn: PhysicalPageNumber) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.frame(ppn), PAGE_SIZE_USIZE).to_vec() }
    }

    pub fn is_zero(&self, ppn: PhysicalPageNumber) -> bool {
        self.read(ppn).iter().all(|&b| b == 0)
    }

    /// Mappings not yet released.
    pub fn outstanding(&self) -> usize {
        self.maps.load(Ordering::SeqCst) - self.puts.load(Ordering::SeqCst)
    }

    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }
}

unsafe impl PhysicalPageMapper for FakePhysMem {
    fn get_physical_page(&self, pa: PhysicalAddress) -> VirtualAddress {
        self.maps.fetch_add(1, Ordering::SeqCst);
        VirtualAddress::from_ptr(self.frame(pa.page_number()).cast_const())
    }

    fn put_physical_page(&self, _va: VirtualAddress) {
        self.puts.fetch_add(1, Ordering::SeqCst);
    }
}

pub type TestPages = VmPages<Arc<FakePhysMem>>;

/// Allocator over `count` pages of contiguous RAM with nothing reserved.
pub fn flat(count: u64, config: VmPageConfig) -> (TestPages, Arc<FakePhysMem>) {
    with_map(&boot_map(&[(0, count)], &[]), count, config)
}

pub fn with_map(
    map: &BootMemoryMap,
    span: u64,
    config: VmPageConfig,
) -> (TestPages, Arc<FakePhysMem>) {
    let mem = FakePhysMem::new(usize::try_from(span).unwrap());
    let pages = VmPages::new(map, Arc::clone(&mem), config).unwrap();
    (pages, mem)
}

/// Every page is on exactly the queue its state maps to; free pages are
/// unreferenced; the free count matches the queues.
pub fn assert_queue_invariants<M: PhysicalPageMapper>(pages: &VmPages<M>) {
    let mut seen = HashSet::new();
    for kind in QueueKind::ALL {
        let members = pages.queue_pages(kind);
        assert_eq!(members.len(), pages.queue_len(kind), "{kind} count");
        for ppn in members {
            assert!(seen.insert(ppn), "{ppn} on two queues");
            let info = pages.lookup_page(ppn).unwrap();
            assert_eq!(info.state.queue(), kind, "{ppn} is {}", info.state);
            if info.state.is_free() {
                assert_eq!(info.ref_count, 0, "free page {ppn} is referenced");
            }
        }
    }
    assert_eq!(seen.len(), pages.num_pages());
    assert_eq!(
        pages.num_free_pages(),
        pages.queue_len(QueueKind::Free) + pages.queue_len(QueueKind::Clear)
    );
}

pub fn state_of<M: PhysicalPageMapper>(pages: &VmPages<M>, ppn: PhysicalPageNumber) -> PageState {
    pages.lookup_page(ppn).unwrap().state
}

#[derive(Default)]
pub struct FakeStore {
    pub temporary: bool,
    pub fail: AtomicBool,
    pub writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl BackingStore for FakeStore {
    fn is_temporary(&self) -> bool {
        self.temporary
    }

    fn write(&self, offset: u64, buffers: &[&[u8]]) -> Result<usize, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io);
        }
        let data = buffers.concat();
        let len = data.len();
        self.writes.lock().unwrap().push((offset, data));
        Ok(len)
    }
}

#[derive(Default)]
pub struct FakeTranslationMap {
    locked: AtomicBool,
    pub cleared: Mutex<Vec<VirtualAddress>>,
}

impl TranslationMap for FakeTranslationMap {
    fn lock(&self) {
        assert!(!self.locked.swap(true, Ordering::SeqCst), "map locked twice");
    }

    fn unlock(&self) {
        assert!(self.locked.swap(false, Ordering::SeqCst), "map not locked");
    }

    fn clear_modified(&self, va: VirtualAddress) {
        assert!(self.locked.load(Ordering::SeqCst), "clear_modified without lock");
        self.cleared.lock().unwrap().push(va);
    }
}

pub struct FakeRegion {
    pub base: VirtualAddress,
    pub size: u64,
    pub cache_offset: u64,
    pub map: Arc<FakeTranslationMap>,
}

#[derive(Default)]
pub struct FakeCache {
    pub store: FakeStore,
    pub regions: Vec<FakeRegion>,
    pub refs: AtomicI64,
    pub forced: AtomicUsize,
}

impl FakeCache {
    pub fn new(temporary: bool) -> Arc<Self> {
        Arc::new(Self {
            store: FakeStore {
                temporary,
                ..FakeStore::default()
            },
            ..Self::default()
        })
    }

    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.store.writes.lock().unwrap().clone()
    }
}

impl Cache for FakeCache {
    fn acquire_ref(&self, force: bool) {
        if force {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release_ref(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }

    fn store(&self) -> &dyn BackingStore {
        &self.store
    }

    fn for_each_region(&self, f: &mut dyn FnMut(&RegionMapping<'_>)) {
        for region in &self.regions {
            f(&RegionMapping {
                base: region.base,
                size: region.size,
                cache_offset: region.cache_offset,
                translation_map: &*region.map,
            });
        }
    }
}

/// Blocking semaphore on top of a condition variable.
#[derive(Default)]
pub struct StdSemaphore {
    count: Mutex<usize>,
    available: Condvar,
    waiting: AtomicUsize,
    acquired: AtomicUsize,
}

impl StdSemaphore {
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Threads currently asleep in [`acquire`](WaitSemaphore::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Successful blocking acquires so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl WaitSemaphore for StdSemaphore {
    fn release(&self) {
        *self.count.lock().unwrap() += 1;
        self.available.notify_one();
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while *count == 0 {
            count = self.available.wait(count).unwrap();
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        *count -= 1;
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn try_acquire(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }
}

/// Kernel threads on top of `std::thread`.
#[derive(Default)]
pub struct StdThreads {
    pub spawned: Mutex<Vec<(&'static str, ThreadPriority)>>,
    pub semaphores: Mutex<Vec<(&'static str, Arc<StdSemaphore>)>>,
}

impl StdThreads {
    pub fn semaphore(&self, name: &str) -> Arc<StdSemaphore> {
        let semaphores = self.semaphores.lock().unwrap();
        let (_, sem) = semaphores
            .iter()
            .find(|(n, _)| *n == name)
            .unwrap_or_else(|| panic!("no semaphore {name}"));
        Arc::clone(sem)
    }
}

impl KernelThreads for StdThreads {
    fn spawn(
        &self,
        name: &'static str,
        priority: ThreadPriority,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<(), SpawnError> {
        std::thread::Builder::new()
            .name(name.into())
            .spawn(entry)
            .map_err(|_| SpawnError { name })?;
        self.spawned.lock().unwrap().push((name, priority));
        Ok(())
    }

    fn create_semaphore(&self, name: &'static str) -> Result<Arc<dyn WaitSemaphore>, SpawnError> {
        let sem = Arc::new(StdSemaphore::default());
        self.semaphores.lock().unwrap().push((name, Arc::clone(&sem)));
        Ok(sem)
    }

    fn snooze(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Default)]
pub struct FakeDebugger {
    commands: Mutex<Vec<(&'static str, DebuggerCommand)>>,
}

impl FakeDebugger {
    pub fn run(&self, name: &str) -> String {
        let commands = self.commands.lock().unwrap();
        let (_, command) = commands
            .iter()
            .find(|(n, _)| *n == name)
            .unwrap_or_else(|| panic!("no command {name}"));
        let mut out = String::new();
        command(&mut out).unwrap();
        out
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }
}

impl DebuggerCommands for FakeDebugger {
    fn add_command(&self, name: &'static str, _help: &'static str, command: DebuggerCommand) {
        self.commands.lock().unwrap().push((name, command));
    }
}

/// Poll `cond` for up to two seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
