//! `fork`/`waitpid`/`kill` properties (spec.md 4.5): a forked child gets
//! its own pid and a COW-shared address space with the parent, a zombie
//! child is reaped exactly once by `waitpid`, `waitpid` on a pid with no
//! matching child fails, and `kill`ing another task moves it straight to
//! zombie/terminated without running it.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(helios_kernel::test_framework::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use helios_kernel::hal::TrapFrame;
use helios_kernel::mm::frame::{MemoryRegion, PAddr, PMM};
use helios_kernel::process::{fork, kill, waitpid, WaitOptions};
use helios_kernel::sched::scheduler;
use helios_kernel::sched::task::TaskState;
use helios_kernel::KernelError;

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

/// Forks once, leaving the child Ready and registered but never actually
/// scheduled onto the CPU -- every test here drives the child's lifecycle
/// directly through `scheduler`/`process`, the same bookkeeping a real
/// context switch and exit would, without needing the child to run.
fn fork_child() -> helios_kernel::Pid {
    let frame = TrapFrame::default();
    fork(&frame).expect("fork must succeed with ample free memory")
}

#[test_case]
fn fork_registers_a_distinct_ready_child() {
    let parent = scheduler::current_task();
    let child_pid = fork_child();
    assert_ne!(child_pid, parent.pid);

    let child = scheduler::lookup(child_pid).expect("forked child must be registered");
    assert_eq!(child.state(), TaskState::Ready);
    assert_eq!(child.parent_pid(), Some(parent.pid));
    assert!(parent.children.lock().contains(&child_pid));

    // Clean up without ever scheduling the child onto the CPU.
    scheduler::finish_exit(&child, 0, false, true);
}

#[test_case]
fn fork_shares_the_parents_address_space_copy_on_write() {
    let parent = scheduler::current_task();
    let child_pid = fork_child();
    let child = scheduler::lookup(child_pid).unwrap();

    // clone_for_fork hands the child its own AddressSpace value (a
    // distinct page-table root), but every present parent leaf was
    // walked into it -- the two handles are not the same root.
    assert_ne!(
        parent.address_space().handle().root,
        child.address_space().handle().root
    );

    scheduler::finish_exit(&child, 0, false, true);
}

#[test_case]
fn waitpid_reaps_a_zombie_child_exactly_once() {
    let parent = scheduler::current_task();
    let child_pid = fork_child();
    let child = scheduler::lookup(child_pid).unwrap();

    // Simulate the child calling sys_exit(7): parent is alive, so it
    // lands in Zombie rather than Terminated.
    scheduler::finish_exit(&child, 7, false, false);
    assert_eq!(child.state(), TaskState::Zombie);

    let (reaped_pid, wstatus) = waitpid(child_pid as i64, WaitOptions::NONE).unwrap();
    assert_eq!(reaped_pid, child_pid);
    assert_eq!(wstatus, 7 << 8); // WEXITSTATUS(wstatus) == 7, WIFEXITED

    assert!(!parent.children.lock().contains(&child_pid));
    assert!(scheduler::lookup(child_pid).is_none());

    // The same pid cannot be reaped a second time.
    let err = waitpid(child_pid as i64, WaitOptions::NONE).unwrap_err();
    assert!(matches!(err, KernelError::NoSuchChild));
}

#[test_case]
fn waitpid_wnohang_returns_zero_pid_while_child_is_still_live() {
    let child_pid = fork_child();
    let child = scheduler::lookup(child_pid).unwrap();

    let (pid, status) = waitpid(child_pid as i64, WaitOptions::WNOHANG).unwrap();
    assert_eq!((pid, status), (0, 0));

    scheduler::finish_exit(&child, 0, false, true);
}

#[test_case]
fn waitpid_on_a_nonexistent_child_fails() {
    let err = waitpid(999_999, WaitOptions::NONE).unwrap_err();
    assert!(matches!(err, KernelError::NoSuchChild));
}

#[test_case]
fn kill_moves_a_live_child_straight_to_zombie_without_running_it() {
    let child_pid = fork_child();
    kill(child_pid, 9).unwrap();

    let (reaped_pid, wstatus) = waitpid(child_pid as i64, WaitOptions::NONE).unwrap();
    assert_eq!(reaped_pid, child_pid);
    assert_eq!(wstatus, 9); // signaled: wstatus decodes back to the delivering signal
}

#[test_case]
fn kill_of_an_unknown_pid_fails() {
    let err = kill(999_999, 9).unwrap_err();
    assert!(matches!(err, KernelError::NoSuchProcess { .. }));
}
