mod common;

use common::*;
use kernel_bootmem::BootAllocator;
use kernel_vm_page::{ExhaustionPolicy, PageState, VmPageConfig, VmPages};

#[test]
fn pages_taken_during_boot_stay_reserved() {
    // Kernel image in the first two pages, RAM for 32.
    let mut boot = BootAllocator::new(boot_map(&[(0, 32)], &[(0, 2)]));
    let taken: Vec<_> = (0..3).map(|_| boot.alloc_physical_page().unwrap()).collect();
    assert_eq!(taken, vec![ppn(2), ppn(3), ppn(4)]);

    let map = boot.finish();
    let mem = FakePhysMem::new(32);
    let config = VmPageConfig::default().with_exhaustion_policy(ExhaustionPolicy::ReturnError);
    let pages = VmPages::new(&map, mem, config).unwrap();

    assert_eq!(pages.num_pages(), 32);
    assert_eq!(pages.num_free_pages(), 27);
    for i in 0..5 {
        assert_eq!(state_of(&pages, ppn(i)), PageState::Unused);
    }
    assert_eq!(pages.allocate_page(PageState::Free), Ok(ppn(5)));
    assert_queue_invariants(&pages);
}

#[test]
fn boot_pages_never_show_up_in_runs() {
    let mut boot = BootAllocator::new(boot_map(&[(0, 16)], &[(4, 1)]));
    boot.alloc_physical_page().unwrap();
    let map = boot.finish();

    let config = VmPageConfig::default().with_exhaustion_policy(ExhaustionPolicy::ReturnError);
    let pages = VmPages::new(&map, FakePhysMem::new(16), config).unwrap();

    assert_eq!(pages.allocate_page_run(PageState::Free, 4), Ok(ppn(0)));
    assert_eq!(pages.allocate_page_run(PageState::Free, 4), Ok(ppn(6)));
    assert!(pages.allocate_page_run(PageState::Free, 8).is_err());
}
