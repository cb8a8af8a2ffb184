//! Typed, ordered MMIO accessors.
//!
//! Every read issues [`read_barrier`] *after* the access; every write
//! issues [`write_barrier`] *before* the access, matching spec.md's MMIO
//! ordering contract. Used by the USB host-controller core, VirtIO
//! devices, and PL011/UART leaf drivers.

use super::barriers::{read_barrier, write_barrier};

/// # Safety
/// `addr` must be a valid, correctly-aligned MMIO address for a register
/// readable at this width, mapped with device (uncached) attributes.
pub unsafe fn read8(addr: u64) -> u8 {
    // SAFETY: forwarded from the caller's contract.
    let v = unsafe { core::ptr::read_volatile(addr as *const u8) };
    read_barrier();
    v
}

/// # Safety
/// See [`read8`].
pub unsafe fn read16(addr: u64) -> u16 {
    // SAFETY: forwarded from the caller's contract.
    let v = unsafe { core::ptr::read_volatile(addr as *const u16) };
    read_barrier();
    v
}

/// # Safety
/// See [`read8`].
pub unsafe fn read32(addr: u64) -> u32 {
    // SAFETY: forwarded from the caller's contract.
    let v = unsafe { core::ptr::read_volatile(addr as *const u32) };
    read_barrier();
    v
}

/// # Safety
/// See [`read8`].
pub unsafe fn read64(addr: u64) -> u64 {
    // SAFETY: forwarded from the caller's contract.
    let v = unsafe { core::ptr::read_volatile(addr as *const u64) };
    read_barrier();
    v
}

/// # Safety
/// `addr` must be a valid, correctly-aligned, exclusively-owned MMIO
/// address for a register writable at this width.
pub unsafe fn write8(addr: u64, value: u8) {
    write_barrier();
    // SAFETY: forwarded from the caller's contract.
    unsafe { core::ptr::write_volatile(addr as *mut u8, value) };
}

/// # Safety
/// See [`write8`].
pub unsafe fn write16(addr: u64, value: u16) {
    write_barrier();
    // SAFETY: forwarded from the caller's contract.
    unsafe { core::ptr::write_volatile(addr as *mut u16, value) };
}

/// # Safety
/// See [`write8`].
pub unsafe fn write32(addr: u64, value: u32) {
    write_barrier();
    // SAFETY: forwarded from the caller's contract.
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
}

/// # Safety
/// See [`write8`].
pub unsafe fn write64(addr: u64, value: u64) {
    write_barrier();
    // SAFETY: forwarded from the caller's contract.
    unsafe { core::ptr::write_volatile(addr as *mut u64, value) };
}
