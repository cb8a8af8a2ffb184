//! Kernel boot sequence (spec.md 2's data flow): HAL bring-up, the PMM
//! and kernel heap, the scheduler, then drivers -- in that order, since
//! each stage depends on the previous one being fully up.

use crate::mm::frame::MemoryRegion;
use crate::mm::PAddr;
use crate::sched::scheduler;
use crate::serial::SerialPort;
use crate::{drivers, hal, log_backend, mm};

/// Standard COM1 I/O port on x86; ignored by the aarch64 PL011 backend,
/// which has its own fixed MMIO base.
const SERIAL_BASE: u16 = 0x3F8;

/// Runs the full boot sequence and hands off to the scheduler's first
/// `schedule()` call. Never returns -- the bootstrap context becomes the
/// idle task (pid 0) and this final loop is its body, dispatched like any
/// other task once something else is ready.
///
/// `memory_map`/`kernel_end` come from whatever boot protocol the
/// platform uses (`main.rs` translates it into this kernel's own
/// [`MemoryRegion`] type before calling here).
pub fn run(memory_map: &[MemoryRegion], kernel_end: PAddr) -> ! {
    // SAFETY: this is the first access to the UART, before any other code
    // in the kernel has touched it.
    let port = unsafe { SerialPort::new(SERIAL_BASE) };
    log_backend::init(port);

    log::info!("bootstrap: stage 1 -- cpu init");
    hal::cpu_init();

    log::info!("bootstrap: stage 1 -- interrupt init");
    hal::interrupt_init();

    log::info!("bootstrap: stage 1 -- mmu init");
    hal::mmu_init();

    log::info!("bootstrap: stage 2 -- memory management");
    mm::init(memory_map, kernel_end);

    log::info!("bootstrap: stage 3 -- scheduler");
    scheduler::init();

    log::info!("bootstrap: stage 4 -- drivers");
    drivers::init();

    log::info!("bootstrap: boot sequence complete, entering scheduler");
    loop {
        scheduler::schedule();
        core::hint::spin_loop();
    }
}
