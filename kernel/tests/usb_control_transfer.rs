//! UHCI host-controller properties (spec.md 4.7): the TD/QH pools
//! free-list correctly (LIFO reuse, exhaustion once every entry is
//! taken), and discovering/bringing up a real controller never panics
//! -- QEMU's default `pc`/`q35` machines usually expose a UHCI
//! controller, but this also has to hold on hardware that has none.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(helios_kernel::test_framework::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use helios_kernel::drivers::usb::host::UhciController;
use helios_kernel::drivers::usb::pci;
use helios_kernel::drivers::usb::td_qh::{Pool, Qh, Td, QH_POOL_SIZE, TD_POOL_SIZE};
use helios_kernel::mm::frame::{MemoryRegion, PAddr, PMM};

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
fn td_pool_reuses_freed_entries_lifo() {
    let mut pool = Pool::<Td>::new().expect("td pool allocation must succeed");
    let a = pool.alloc().unwrap();
    let b = pool.alloc().unwrap();
    assert_ne!(a, b);
    pool.free(b);
    let reused = pool.alloc().expect("a freed entry must be reusable");
    assert_eq!(reused, b, "the most recently freed entry is handed out first");
    pool.free(a);
    pool.free(reused);
}

#[test_case]
fn td_pool_exhausts_after_its_fixed_capacity() {
    let mut pool = Pool::<Td>::new().unwrap();
    let mut taken = alloc::vec::Vec::new();
    for _ in 0..TD_POOL_SIZE {
        taken.push(pool.alloc().expect("pool must yield TD_POOL_SIZE entries"));
    }
    assert!(pool.alloc().is_err(), "one more than capacity must fail");
    for index in taken {
        pool.free(index);
    }
    assert!(pool.alloc().is_ok(), "freeing everything makes the pool usable again");
}

#[test_case]
fn qh_pool_reuses_freed_entries_lifo() {
    let mut pool = Pool::<Qh>::new().expect("qh pool allocation must succeed");
    let mut taken = alloc::vec::Vec::new();
    for _ in 0..QH_POOL_SIZE {
        taken.push(pool.alloc().expect("pool must yield QH_POOL_SIZE entries"));
    }
    assert!(pool.alloc().is_err());
    let freed = taken.pop().unwrap();
    pool.free(freed);
    assert_eq!(pool.alloc().unwrap(), freed);
}

#[test_case]
fn fresh_td_and_qh_entries_report_a_nonzero_physical_address() {
    let mut tds = Pool::<Td>::new().unwrap();
    let index = tds.alloc().unwrap();
    assert_ne!(tds.get(index).phys_addr(), 0);
    tds.free(index);

    let mut qhs = Pool::<Qh>::new().unwrap();
    let index = qhs.alloc().unwrap();
    assert_ne!(qhs.get(index).phys_addr(), 0);
    qhs.free(index);
}

/// `find_uhci`/`UhciController::init` are real port-I/O code; this only
/// asserts they behave -- bring-up succeeds and the controller is
/// running, nothing is asserted about what's actually plugged into the
/// emulated root-hub ports, since nothing attaches one in this suite.
#[test_case]
fn uhci_discovery_and_bringup_never_panics() {
    let Some(location) = pci::find_uhci() else {
        return; // no UHCI controller on this board -- nothing further to check
    };
    let hc = UhciController::init(location.io_base).expect("a discovered controller must reset cleanly");
    assert!(!hc.is_halted(), "USBCMD.RUN was set during init");

    // Neither root-hub port has anything attached in this test
    // environment, so a reset must report "nothing here", not an error.
    assert_eq!(hc.reset_port(0).unwrap(), None);
    assert_eq!(hc.reset_port(1).unwrap(), None);
}
