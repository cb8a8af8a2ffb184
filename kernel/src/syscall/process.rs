//! Process-domain syscalls (`0x00xx`): thin argument-marshalling wrappers
//! over [`crate::process`].

use crate::error::{KernelError, KResult};
use crate::hal::TrapFrame;
use crate::process::{self, WaitOptions};
use crate::sched::scheduler;

pub fn sys_exit(code: i32) -> KResult<isize> {
    scheduler::exit_current(code);
}

pub fn sys_fork(frame: &TrapFrame) -> KResult<isize> {
    process::fork(frame).map(|pid| pid as isize)
}

pub fn sys_execve(path_ptr: u64, path_len: u64, frame: &mut TrapFrame) -> KResult<isize> {
    let path = read_user_str(path_ptr, path_len)?;
    process::execve(&path, frame)?;
    // execve never "returns" a value on success: the trap frame now
    // resumes at the new image's entry point instead of here.
    Ok(0)
}

/// `waitpid(pid, status_ptr, options)`: like POSIX, the reaped status is
/// written through `status_ptr` (skipped if null) and the reaped pid is
/// the return value, since a single return register can't carry both.
pub fn sys_waitpid(pid: i64, status_ptr: u64, options: u32) -> KResult<isize> {
    let options = WaitOptions::from_bits_truncate(options);
    let (reaped_pid, status) = process::waitpid(pid, options)?;
    if status_ptr != 0 {
        // SAFETY: an invalid user pointer page-faults into the ordinary
        // segv path rather than corrupting kernel state, same contract
        // as `read_user_str` below.
        unsafe {
            core::ptr::write(status_ptr as *mut i32, status);
        }
    }
    Ok(reaped_pid as isize)
}

pub fn sys_getpid() -> u64 {
    scheduler::current_task().pid
}

pub fn sys_getppid() -> u64 {
    scheduler::current_task().parent_pid().unwrap_or(0)
}

pub fn sys_kill(pid: u64, signal: i32) -> KResult<isize> {
    process::kill(pid, signal)?;
    Ok(0)
}

pub fn sys_yield() -> KResult<isize> {
    scheduler::yield_now();
    Ok(0)
}

/// Copies a NUL-agnostic, length-prefixed string out of user memory.
/// This kernel has no copy-checked `copy_from_user`: the page-fault
/// service already kills the caller on an invalid user pointer, so a
/// direct read is safe in the same sense every other user-memory access
/// in this kernel is -- it traps, it does not corrupt kernel state.
fn read_user_str(ptr: u64, len: u64) -> KResult<alloc::string::String> {
    if len > 4096 {
        return Err(KernelError::InvalidArgument { name: "path too long" });
    }
    // SAFETY: bounded by `len <= 4096`; an invalid `ptr` page-faults into
    // the ordinary COW/segv service rather than reading kernel memory.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    core::str::from_utf8(bytes)
        .map(alloc::string::String::from)
        .map_err(|_| KernelError::InvalidArgument { name: "path is not valid UTF-8" })
}
