//! i686 HAL implementation: classic 2-level 32-bit paging, `int 0x80`
//! syscall entry, 8259 PIC interrupts. No NX bit (non-PAE paging) and no
//! `syscall`/`sysret` fast path -- both are x86_64-only hardware
//! features.

pub mod context;
pub mod irq;
pub mod mmu;
pub mod syscall_entry;

pub const ARCH_NAME: &str = "i686";

pub fn cpu_init() {
    irq::init_gdt();
}

pub fn interrupt_init() {
    irq::init_idt();
    irq::init_pic();
}

pub fn mmu_init() {
    mmu::init_kernel_space();
}
