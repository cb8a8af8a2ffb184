//! x86_64 HAL implementation: 4-level paging, `syscall`/`sysret`,
//! APIC-free PIC 8259 interrupts (matching the teacher kernel's baseline
//! hardware target).

pub mod context;
pub mod irq;
pub mod mmu;
pub mod syscall_entry;

pub const ARCH_NAME: &str = "x86_64";

pub fn cpu_init() {
    irq::init_gdt();
}

pub fn interrupt_init() {
    irq::init_idt();
    irq::init_pic();
    syscall_entry::init();
}

pub fn mmu_init() {
    mmu::init_kernel_space();
}
