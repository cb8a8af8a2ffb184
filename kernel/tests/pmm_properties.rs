//! Physical frame allocator properties (spec.md's PMM invariants):
//! allocation never double-hands-out a frame, freeing an unaligned or
//! out-of-range address is rejected, refcounts gate actual release, and
//! protected frames are never handed out or freed.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(helios_kernel::test_framework::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use helios_kernel::mm::frame::{MemoryRegion, PAddr, PhysAllocError, PMM};

/// 64 MiB of synthetic usable RAM, starting well past where the bitmap
/// and refcount tables (carved out right after `kernel_end`) could ever
/// collide with frames the tests then allocate. `PMM` is a single global
/// instance and panics on a second `init`, so this runs exactly once,
/// before any `#[test_case]` -- every test below shares the resulting
/// allocator state and must reason in deltas, not absolute counts.
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
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    helios_kernel::test_framework::test_panic_handler(info)
}

#[test_case]
fn alloc_never_reuses_a_live_frame() {
    let a = PMM.alloc_frame().expect("first allocation must succeed");
    let b = PMM.alloc_frame().expect("second allocation must succeed");
    assert_ne!(a, b);
    PMM.free_frame(a).unwrap();
    PMM.free_frame(b).unwrap();
}

#[test_case]
fn freeing_an_unaligned_address_is_rejected() {
    let frame = PMM.alloc_frame().unwrap();
    let unaligned = PAddr::new(frame.as_u64() + 1);
    assert_eq!(PMM.free_frame(unaligned), Err(PhysAllocError::Unaligned));
    PMM.free_frame(frame).unwrap();
}

#[test_case]
fn freeing_an_out_of_range_address_is_rejected() {
    let far_beyond_ram = PAddr::new(1024 * 1024 * 1024);
    assert_eq!(PMM.free_frame(far_beyond_ram), Err(PhysAllocError::InvalidFrame));
}

#[test_case]
fn refcount_gates_actual_release() {
    let frame = PMM.alloc_frame().unwrap();
    assert_eq!(PMM.frame_ref_inc(frame).unwrap(), 2);
    let before = PMM.get_info().free;
    PMM.free_frame(frame).unwrap(); // drops refcount 2 -> 1, frame stays used
    assert_eq!(PMM.get_info().free, before);
    PMM.free_frame(frame).unwrap(); // drops refcount 1 -> 0, frame actually freed
    assert_eq!(PMM.get_info().free, before + 1);
}

#[test_case]
fn protected_frames_refuse_free() {
    let frame = PMM.alloc_frame().unwrap();
    PMM.protect_frame(frame).unwrap();
    assert_eq!(PMM.free_frame(frame), Err(PhysAllocError::Protected));
    PMM.unprotect_frame(frame);
    PMM.free_frame(frame).unwrap();
}

#[test_case]
fn get_info_total_matches_free_plus_used_plus_reserved() {
    let info = PMM.get_info();
    assert_eq!(info.total, info.free + info.used + info.reserved);
}

#[test_case]
fn verify_consistency_holds_after_a_sequence_of_operations() {
    let a = PMM.alloc_frame().unwrap();
    let b = PMM.alloc_huge_page().unwrap();
    PMM.frame_ref_inc(a).unwrap();
    PMM.free_frame(a).unwrap();
    assert!(PMM.verify_consistency());
    PMM.free_frame(a).unwrap();
    PMM.free_huge_page(b).unwrap();
    assert!(PMM.verify_consistency());
}
