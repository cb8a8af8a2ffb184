//! Address-space and copy-on-write properties (spec.md P5/C3): a
//! map/query/unmap round trip preserves address and flags, `fork`'s
//! page-table clone shares frames read-only+COW with the refcount
//! bumped, and the COW fault service reclaims a sole-owner frame in
//! place but copies one that is still shared.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(helios_kernel::test_framework::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use helios_kernel::mm::frame::{MemoryRegion, PAddr, PMM};
use helios_kernel::mm::page_fault;
use helios_kernel::mm::page_table::PteFlags;
use helios_kernel::mm::vas::AddressSpace;
use helios_kernel::mm::VAddr;
use helios_kernel::sched::scheduler;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: first and only access to the UART in this test binary.
    helios_kernel::print::install(unsafe { helios_kernel::serial::SerialPort::new(0x3F8) });
    helios_kernel::hal::cpu_init();
    helios_kernel::hal::interrupt_init();
    helios_kernel::hal::mmu_init();
    let regions = [MemoryRegion {
        start: PAddr::new(0),
        end: PAddr::new(64 * 1024 * 1024),
        available: true,
    }];
    PMM.init(&regions, PAddr::new(4 * 1024 * 1024));
    scheduler::init();
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    helios_kernel::test_framework::test_panic_handler(info)
}

/// Distinct scratch addresses per test, well clear of anything real code
/// in this kernel maps, so tests never collide with each other's entries
/// in the one shared kernel address space.
fn scratch_vaddr(slot: u64) -> VAddr {
    VAddr::new(0xFFFF_A000_0000_0000 + slot * 0x10_0000)
}

#[test_case]
fn map_query_unmap_round_trips_address_and_flags() {
    let space = AddressSpace::current();
    let vaddr = scratch_vaddr(1);
    let frame = PMM.alloc_frame().unwrap();
    let flags = PteFlags::PRESENT | PteFlags::WRITE;

    space.map(vaddr, frame, flags).unwrap();
    let (pa, observed) = space.query(vaddr).expect("just-mapped address must query back");
    assert_eq!(pa, frame);
    assert!(observed.contains(flags));

    let unmapped = space.unmap(vaddr).unwrap();
    assert_eq!(unmapped, frame);
    assert!(space.query(vaddr).is_none());
    PMM.free_frame(frame).unwrap();
}

#[test_case]
fn clone_for_fork_shares_writable_leaves_as_read_only_cow() {
    let parent = AddressSpace::current();
    let vaddr = scratch_vaddr(2);
    let frame = PMM.alloc_frame().unwrap();
    parent
        .map(vaddr, frame, PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER)
        .unwrap();

    let before_refcount = PMM.frame_get_refcount(frame);
    let child = parent.clone_for_fork().unwrap();

    let (parent_pa, parent_flags) = parent.query(vaddr).unwrap();
    let (child_pa, child_flags) = child.query(vaddr).unwrap();
    assert_eq!(parent_pa, frame);
    assert_eq!(child_pa, frame);
    assert!(!parent_flags.contains(PteFlags::WRITE));
    assert!(parent_flags.contains(PteFlags::COW));
    assert!(!child_flags.contains(PteFlags::WRITE));
    assert!(child_flags.contains(PteFlags::COW));
    assert_eq!(PMM.frame_get_refcount(frame), before_refcount + 1);

    parent.unmap(vaddr).unwrap();
    PMM.free_frame(frame).unwrap(); // drop the parent's share
    drop(child); // drops the last share, actually freeing the frame
}

#[test_case]
fn cow_fault_reclaims_sole_owner_frame_in_place() {
    let space = AddressSpace::current();
    let vaddr = scratch_vaddr(3);
    let frame = PMM.alloc_frame().unwrap(); // refcount 1, no other sharer
    space.map(vaddr, frame, PteFlags::PRESENT | PteFlags::COW).unwrap();

    page_fault::handle(vaddr.as_u64(), true, false, 0);

    let (pa, flags) = space.query(vaddr).unwrap();
    assert_eq!(pa, frame, "sole owner keeps its own frame, never copies");
    assert!(flags.contains(PteFlags::WRITE));
    assert!(!flags.contains(PteFlags::COW));

    space.unmap(vaddr).unwrap();
    PMM.free_frame(frame).unwrap();
}

#[test_case]
fn cow_fault_copies_a_still_shared_frame() {
    let space = AddressSpace::current();
    let vaddr = scratch_vaddr(4);
    let frame = PMM.alloc_frame().unwrap();
    PMM.frame_ref_inc(frame).unwrap(); // simulate a second sharer
    space.map(vaddr, frame, PteFlags::PRESENT | PteFlags::COW).unwrap();

    page_fault::handle(vaddr.as_u64(), true, false, 0);

    let (pa, flags) = space.query(vaddr).unwrap();
    assert_ne!(pa, frame, "a still-shared frame must be copied, not reclaimed");
    assert!(flags.contains(PteFlags::WRITE));
    assert!(!flags.contains(PteFlags::COW));
    assert_eq!(PMM.frame_get_refcount(frame), 1, "original sharer's refcount was decremented");

    space.unmap(vaddr).unwrap();
    PMM.free_frame(frame).unwrap();
    PMM.free_frame(pa).unwrap();
}
