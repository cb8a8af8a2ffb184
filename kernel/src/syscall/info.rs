//! Info-domain syscalls (`0x05xx`): `uname` (SPEC_FULL.md §11).

use crate::error::{KernelError, KResult};
use crate::hal;

/// Field width the fixed `uname` struct uses per field, matching the
/// classic POSIX `utsname` layout closely enough for this kernel's
/// single-purpose use (diagnostics only, never re-parsed by the kernel
/// itself).
const FIELD_LEN: usize = 32;

#[repr(C)]
pub struct Utsname {
    pub sysname: [u8; FIELD_LEN],
    pub release: [u8; FIELD_LEN],
    pub machine: [u8; FIELD_LEN],
}

const KERNEL_RELEASE: &str = env!("CARGO_PKG_VERSION");

fn fill(dst: &mut [u8; FIELD_LEN], src: &str) {
    let n = src.len().min(FIELD_LEN - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
    dst[n] = 0;
}

/// Writes a fixed `sysname`/`release`/`machine` struct at `out_ptr`.
pub fn sys_uname(out_ptr: u64) -> KResult<isize> {
    if out_ptr == 0 {
        return Err(KernelError::InvalidArgument { name: "uname: null output pointer" });
    }
    let mut uts = Utsname {
        sysname: [0; FIELD_LEN],
        release: [0; FIELD_LEN],
        machine: [0; FIELD_LEN],
    };
    fill(&mut uts.sysname, "helios");
    fill(&mut uts.release, KERNEL_RELEASE);
    fill(&mut uts.machine, hal::arch_name());

    // SAFETY: an invalid user pointer page-faults into the segv path
    // rather than corrupting kernel state, same contract as the other
    // syscall handlers' user-memory writes.
    unsafe {
        core::ptr::write(out_ptr as *mut Utsname, uts);
    }
    Ok(0)
}
