//! Hardware Abstraction Layer (C1).
//!
//! The HAL is the only code in this kernel allowed to know instruction
//! encodings, privilege-level structures, register names, or bit
//! positions. Everything above this module -- the PMM, paging, the
//! scheduler, the syscall surface, drivers -- talks to hardware only
//! through the functions re-exported here.
//!
//! Dispatch to the per-architecture implementation is a compile-time
//! `cfg(target_arch = "...")` selection, never a runtime vtable: each
//! build of this kernel targets exactly one architecture.

use core::sync::atomic::{AtomicBool, Ordering};

pub mod barriers;
pub mod context;
pub mod mmio;

#[cfg(target_arch = "x86")]
#[path = "i686/mod.rs"]
pub mod arch_impl;
#[cfg(target_arch = "x86_64")]
#[path = "x86_64/mod.rs"]
pub mod arch_impl;
#[cfg(target_arch = "aarch64")]
#[path = "aarch64/mod.rs"]
pub mod arch_impl;

pub use barriers::{instruction_barrier, memory_barrier, read_barrier, write_barrier};
pub use context::{
    context_init, context_init_fork, context_set_kernel_stack, context_switch, Context,
};
pub use mmio::{read16, read32, read64, read8, write16, write32, write64, write8};

static CPU_INITIALIZED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_INITIALIZED: AtomicBool = AtomicBool::new(false);
static MMU_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Architecture identity string: one of "i686"/"x86_64"/"arm64".
pub fn arch_name() -> &'static str {
    arch_impl::ARCH_NAME
}

/// Native pointer width in bytes: 4 on i686, 8 on x86_64/arm64.
pub const fn pointer_size() -> usize {
    core::mem::size_of::<usize>()
}

/// Whether this build targets a 64-bit address space.
pub const fn is_64bit() -> bool {
    pointer_size() == 8
}

pub fn cpu_initialized() -> bool {
    CPU_INITIALIZED.load(Ordering::Acquire)
}

pub fn interrupt_initialized() -> bool {
    INTERRUPT_INITIALIZED.load(Ordering::Acquire)
}

pub fn mmu_initialized() -> bool {
    MMU_INITIALIZED.load(Ordering::Acquire)
}

/// Bring up the CPU: segment/GDT setup on x86, EL1 bring-up on AArch64.
///
/// # Panics
/// Panics if called a second time -- re-initializing CPU state is a
/// programming error, per the Unrecoverable class in the error-handling
/// design.
pub fn cpu_init() {
    if CPU_INITIALIZED.swap(true, Ordering::AcqRel) {
        panic!("hal::cpu_init called twice");
    }
    arch_impl::cpu_init();
}

/// Bring up interrupt/exception dispatch (IDT on x86, the exception vector
/// table on AArch64). Must run after [`cpu_init`].
///
/// # Panics
/// Panics on double-init.
pub fn interrupt_init() {
    if INTERRUPT_INITIALIZED.swap(true, Ordering::AcqRel) {
        panic!("hal::interrupt_init called twice");
    }
    arch_impl::interrupt_init();
}

/// Bring up the MMU: install the kernel's own page tables and switch to
/// them. Must run after [`interrupt_init`], since page faults during setup
/// need a working exception path.
///
/// # Panics
/// Panics on double-init.
pub fn mmu_init() {
    if MMU_INITIALIZED.swap(true, Ordering::AcqRel) {
        panic!("hal::mmu_init called twice");
    }
    arch_impl::mmu_init();
}

pub use arch_impl::mmu::{
    current_space, destroy_space, flush_tlb, flush_tlb_all, map, query, switch_space, unmap,
    AddressSpaceHandle,
};
pub use arch_impl::mmu::create_space;
pub use arch_impl::mmu::for_each_user_leaf;

pub use arch_impl::syscall_entry::TrapFrame;

/// Set the kernel stack the next `syscall`/interrupt entry from user mode
/// switches onto. Called by the scheduler on every context switch so a
/// trap always lands on the incoming task's own kernel stack.
pub fn set_kernel_stack(top: usize) {
    context_set_kernel_stack(top);
    arch_impl::syscall_entry::set_kernel_syscall_stack(top as u64);
}

/// Number of levels the page-table walk has: 2 on i686, 4 on x86_64/arm64.
pub const fn pgtable_levels() -> usize {
    arch_impl::mmu::PGTABLE_LEVELS
}

/// Entries per page-table level.
pub const fn pgtable_entries_per_level() -> usize {
    arch_impl::mmu::ENTRIES_PER_LEVEL
}

/// Whether the architecture has a hardware no-execute bit.
pub const fn pgtable_supports_nx() -> bool {
    arch_impl::mmu::SUPPORTS_NX
}

/// Whether the architecture supports a huge-page leaf at a non-bottom
/// level (2 MiB on x86_64, 2 MiB block mappings on AArch64).
pub const fn pgtable_supports_huge_pages() -> bool {
    arch_impl::mmu::SUPPORTS_HUGE_PAGES
}

/// Disable interrupts, run `f`, then restore the saved interrupt flag.
/// The one IRQ-save primitive every spinlock-protected singleton
/// (PMM, ready queue, keyboard ring buffer) is built on.
pub fn with_irq_disabled<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = arch_impl::irq::disable();
    let result = f();
    if was_enabled {
        arch_impl::irq::enable();
    }
    result
}
