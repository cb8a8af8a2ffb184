//! AArch64 exception-vector-table bring-up and a minimal GICv2
//! distributor/CPU-interface driver for the timer interrupt.

use core::arch::asm;

use cortex_a::registers::{CNTP_CTL_EL0, CNTP_TVAL_EL0, DAIF, VBAR_EL1};
use tock_registers::interfaces::{Readable, Writeable};

/// Physical addresses of the GICv2 distributor and CPU interface, as
/// specified on the `virt` QEMU machine this kernel targets.
const GICD_BASE: u64 = 0x0800_0000;
const GICC_BASE: u64 = 0x0801_0000;
const GICD_CTLR: u64 = GICD_BASE;
const GICD_ISENABLER0: u64 = GICD_BASE + 0x100;
const GICC_CTLR: u64 = GICC_BASE;
const GICC_PMR: u64 = GICC_BASE + 0x0004;
const GICC_EOIR: u64 = GICC_BASE + 0x0010;
const GICC_IAR: u64 = GICC_BASE + 0x000C;
const TIMER_IRQ: u32 = 30; // CNTP, PPI 14 -> INTID 30

unsafe extern "C" {
    /// Defined in the naked assembly vector table below; the linker
    /// script places `exception_vectors` on a 2 KiB boundary as VBAR_EL1
    /// requires.
    #[link_name = "exception_vectors"]
    static EXCEPTION_VECTORS: u8;
}

pub fn init_vbar() {
    // SAFETY: `EXCEPTION_VECTORS` names the vector table emitted below;
    // installing it in VBAR_EL1 is the standard AArch64 exception setup.
    unsafe {
        VBAR_EL1.set(core::ptr::addr_of!(EXCEPTION_VECTORS) as u64);
        asm!("isb");
    }
}

pub fn init_gic() {
    // SAFETY: the GIC is owned exclusively by the kernel at this point in
    // boot; MMIO accesses go through the HAL's barrier-respecting helpers.
    unsafe {
        crate::hal::mmio::write32(GICD_CTLR, 1); // enable distributor
        crate::hal::mmio::write32(GICC_CTLR, 1); // enable CPU interface
        crate::hal::mmio::write32(GICC_PMR, 0xFF); // unmask all priorities
        crate::hal::mmio::write32(GICD_ISENABLER0, 1 << TIMER_IRQ);
    }
    CNTP_TVAL_EL0.set(10_000_000); // ~100ms @ 100MHz generic timer
    CNTP_CTL_EL0.write(cortex_a::registers::CNTP_CTL_EL0::ENABLE::SET);
}

pub fn disable() -> bool {
    let was_enabled = !DAIF.is_set(cortex_a::registers::DAIF::I);
    // SAFETY: masking IRQs is always sound.
    unsafe {
        asm!("msr daifset, #2");
    }
    was_enabled
}

pub fn enable() {
    // SAFETY: unmasking IRQs from kernel context is always sound here;
    // this kernel never runs with IRQs unmasked inside a critical
    // section.
    unsafe {
        asm!("msr daifclr, #2");
    }
}

pub fn set_el0_exception_stack(_top: u64) {
    // This kernel keeps a single kernel stack per task reached via
    // `sp_el1`, already switched by `context_switch`; nothing additional
    // to program here, unlike x86_64's separate TSS.RSP0.
}

/// Kernel-sourced (EL1h) synchronous exception: only data aborts are
/// expected here (a COW fault taken while the kernel itself touches user
/// memory, e.g. via `copy_from_user`).
#[unsafe(no_mangle)]
extern "C" fn handle_sync_exception(elr: u64, esr: u64, far: u64) {
    let ec = (esr >> 26) & 0x3F;
    match ec {
        0x24 | 0x25 => {
            let is_write = esr & (1 << 6) != 0;
            crate::mm::page_fault::handle(far, is_write, false, elr);
        }
        _ => panic!("unhandled EL1 synchronous exception: ec={ec:#x} far={far:#x} elr={elr:#x}"),
    }
}

/// User-sourced (EL0, AArch64) synchronous exception: `svc #0` or a data
/// abort from user code. `frame` is the `syscall_entry::TrapFrame`-layout
/// block the `sync_el0_64` vector slot built on the kernel stack.
#[unsafe(no_mangle)]
extern "C" fn handle_sync_el0(frame: *mut super::syscall_entry::TrapFrame, esr: u64, far: u64) {
    let ec = (esr >> 26) & 0x3F;
    match ec {
        0x15 => {
            super::syscall_entry::dispatch_syscall(frame);
        }
        0x24 => {
            // SAFETY: `frame` is valid for the duration of this call.
            let elr = unsafe { (*frame).elr };
            let is_write = esr & (1 << 6) != 0;
            crate::mm::page_fault::handle(far, is_write, true, elr);
        }
        _ => panic!("unhandled EL0 synchronous exception: ec={ec:#x} far={far:#x}"),
    }
}

#[unsafe(no_mangle)]
extern "C" fn handle_irq_exception() {
    // SAFETY: reading the GIC's IAR/EOIR registers is always valid once
    // `init_gic` has run.
    let iar = unsafe { crate::hal::mmio::read32(GICC_IAR) };
    let irq = iar & 0x3FF;
    if irq == TIMER_IRQ {
        CNTP_TVAL_EL0.set(10_000_000);
        crate::sched::scheduler::on_timer_tick();
    }
    // SAFETY: EOI is always safe to issue for an IRQ just acknowledged.
    unsafe {
        crate::hal::mmio::write32(GICC_EOIR, iar);
    }
}

core::arch::global_asm!(
    ".section .text.exception_vectors",
    ".align 11",
    ".global exception_vectors",
    "exception_vectors:",
    // Each of the 16 128-byte-aligned slots; only sync-EL1h and
    // irq-EL1h/EL0 are meaningfully populated, the rest panic via a
    // shared unexpected-exception stub.
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b sync_el1h",
    ".align 7", "b irq_el1h",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b sync_el0_64",
    ".align 7", "b irq_el0_64",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    ".align 7", "b unexpected_exception",
    "sync_el1h:",
    "stp x29, x30, [sp, #-16]!",
    "mrs x0, elr_el1",
    "mrs x1, esr_el1",
    "mrs x2, far_el1",
    "bl {sync_handler}",
    "ldp x29, x30, [sp], #16",
    "eret",
    "sync_el0_64:",
    // Build a syscall_entry::TrapFrame directly on the stack: x0-x5, x8,
    // elr_el1, spsr_el1, sp_el0, in that field order.
    "sub sp, sp, #80",
    "stp x0, x1, [sp, #0]",
    "stp x2, x3, [sp, #16]",
    "stp x4, x5, [sp, #32]",
    "str x8, [sp, #48]",
    "mrs x9, elr_el1",
    "str x9, [sp, #56]",
    "mrs x9, spsr_el1",
    "str x9, [sp, #64]",
    "mrs x9, sp_el0",
    "str x9, [sp, #72]",
    "mov x0, sp",
    "mrs x1, esr_el1",
    "mrs x2, far_el1",
    "bl {sync_el0_handler}",
    "ldp x0, x1, [sp, #0]",
    "ldp x2, x3, [sp, #16]",
    "ldp x4, x5, [sp, #32]",
    "ldr x9, [sp, #56]",
    "msr elr_el1, x9",
    "add sp, sp, #80",
    "eret",
    "irq_el1h:",
    "irq_el0_64:",
    "stp x29, x30, [sp, #-16]!",
    "bl {irq_handler}",
    "ldp x29, x30, [sp], #16",
    "eret",
    "unexpected_exception:",
    "b unexpected_exception",
    sync_handler = sym handle_sync_exception,
    sync_el0_handler = sym handle_sync_el0,
    irq_handler = sym handle_irq_exception,
);
