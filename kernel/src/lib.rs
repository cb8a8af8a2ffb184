//! Helios kernel library.
//!
//! Exposes every kernel subsystem as a module so the bare-metal binary
//! (`main.rs`), the `kernel/tests/*.rs` integration suites, and this
//! crate's own `#[cfg(test)]` unit tests can all link against the same
//! code. Bare-metal builds (`target_os = "none"`) use the custom no_std
//! test harness below, required by both the freestanding integration
//! binaries (which touch real hardware -- port I/O, `cli`/`sti`, page
//! tables -- and so must run under QEMU) and by `cargo test` against
//! this crate's own bare-metal target. The host target's job is purely
//! to let the pure-logic unit tests in individual modules (bit-packing,
//! intrinsics, status classification) run as ordinary `#[test]`s under
//! a normal OS process without needing a VM at all.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_framework::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Host target (cargo test on the developer's machine): delegate to the
// system allocator so Vec/String/Arc work normally in integration tests.
// Bare-metal builds install their own allocator in `mm::heap`.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(all(not(target_os = "none"), feature = "alloc"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod bootstrap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod hal;
pub mod log_backend;
pub mod mm;
pub mod net;
pub mod process;
pub mod sched;
pub mod serial;
pub mod syscall;

pub use error::{KernelError, KResult};
pub use mm::{PAddr, VAddr, FRAME_SIZE};
pub use sched::task::{Pid, Task};

#[cfg(target_os = "none")]
use core::panic::PanicInfo;

/// Heap allocation failure is unrecoverable on a no_std kernel; the
/// `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {layout:?}");
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(target_os = "none")]
pub mod test_framework {
    //! No-std test harness: serial output plus a QEMU debug-exit device,
    //! since a bare-metal test binary has no process exit code to report
    //! through.

    use core::panic::PanicInfo;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum QemuExitCode {
        Success = 0x10,
        Failed = 0x11,
    }

    pub trait Testable {
        fn run(&self);
    }

    impl<T: Fn()> Testable for T {
        fn run(&self) {
            crate::println!("{}...", core::any::type_name::<T>());
            self();
        }
    }

    pub fn test_runner(tests: &[&dyn Testable]) {
        crate::println!("running {} tests", tests.len());
        for test in tests {
            test.run();
        }
        exit_qemu(QemuExitCode::Success);
    }

    pub fn test_panic_handler(info: &PanicInfo) -> ! {
        crate::println!("[failed]\n{info}");
        exit_qemu(QemuExitCode::Failed)
    }

    pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        // SAFETY: port 0xf4 is QEMU's isa-debug-exit device; writing to it
        // terminates the VM before the `unreachable_unchecked` below would
        // ever actually execute.
        unsafe {
            core::arch::asm!("out dx, eax", in("dx") 0xf4u16, in("eax") exit_code as u32);
            core::hint::unreachable_unchecked();
        }
        #[cfg(target_arch = "aarch64")]
        {
            const PSCI_SYSTEM_OFF: u32 = 0x8400_0008;
            // SAFETY: PSCI SYSTEM_OFF is a standard hypercall QEMU's virt
            // machine implements; it never returns.
            unsafe {
                core::arch::asm!(
                    "mov w0, {op:w}",
                    "hvc #0",
                    op = in(reg) PSCI_SYSTEM_OFF,
                    options(noreturn)
                );
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        loop {
            core::hint::spin_loop();
        }
    }
}
