//! Architecture-neutral memory barrier primitives.
//!
//! Centralizes fence/barrier operations so call sites outside the HAL
//! never need a `#[cfg(target_arch)]` block of their own. Used directly by
//! the USB host-controller core and the VirtIO ring, and indirectly by
//! every MMIO access through [`super::mmio`].

/// Full memory fence: every read/write issued before this call is globally
/// visible before any read/write issued after it.
#[inline(always)]
pub fn memory_barrier() {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy` orders all preceding memory accesses before any
        // that follow. No side effects beyond ordering.
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }
}

/// Barrier ordering prior reads before whatever follows. Used after an
/// MMIO read so the loaded value is visible before the caller acts on it.
#[inline(always)]
pub fn read_barrier() {
    memory_barrier();
}

/// Barrier ordering whatever precedes before a write becomes visible.
/// Used before an MMIO write so preceding stores (e.g. setting up a
/// descriptor) land before the device-visible doorbell write.
#[inline(always)]
pub fn write_barrier() {
    memory_barrier();
}

/// Instruction-stream synchronization barrier: flush the pipeline so
/// subsequent instructions observe prior stores (needed on AArch64 after
/// writing code or page-table entries that affect fetch). A no-op on
/// x86_64, whose strongly-ordered model makes it unnecessary.
#[inline(always)]
pub fn instruction_barrier() {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {}
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `isb` only flushes the instruction pipeline; no memory
        // side effects.
        unsafe {
            core::arch::asm!("isb", options(nostack, preserves_flags));
        }
    }
}
