//! AArch64 HAL implementation: 4-level translation tables (4 KiB
//! granule), exception-vector-table trap dispatch, `svc #0` syscalls.

pub mod context;
pub mod irq;
pub mod mmu;
pub mod syscall_entry;

pub const ARCH_NAME: &str = "arm64";

pub fn cpu_init() {
    irq::init_vbar();
}

pub fn interrupt_init() {
    irq::init_gic();
}

pub fn mmu_init() {
    mmu::init_kernel_space();
}
