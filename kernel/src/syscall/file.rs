//! File-domain syscalls (`0x01xx`): thin wrappers over the current
//! task's [`crate::fs::FdTable`].

use alloc::string::String;

use crate::error::{KernelError, KResult};
use crate::fs;
use crate::sched::scheduler;

fn read_user_str(ptr: u64, len: u64) -> KResult<String> {
    if len > 4096 {
        return Err(KernelError::InvalidArgument { name: "path too long" });
    }
    // SAFETY: see `syscall::process::read_user_str` -- an invalid `ptr`
    // page-faults into the segv path rather than reading kernel memory.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    core::str::from_utf8(bytes)
        .map(String::from)
        .map_err(|_| KernelError::InvalidArgument { name: "path is not valid UTF-8" })
}

pub fn sys_open(path_ptr: u64, path_len: u64) -> KResult<isize> {
    let path = read_user_str(path_ptr, path_len)?;
    let file = fs::open(&path)?;
    let fd = scheduler::current_task().fd_table.lock().install(file)?;
    Ok(fd as isize)
}

pub fn sys_close(fd: i32) -> KResult<isize> {
    scheduler::current_task().fd_table.lock().close(fd)?;
    Ok(0)
}

pub fn sys_read(fd: i32, buf_ptr: u64, buf_len: u64) -> KResult<isize> {
    let task = scheduler::current_task();
    let file = task.fd_table.lock().get(fd)?;
    // SAFETY: bounded by `buf_len`; an invalid user pointer page-faults.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, buf_len as usize) };
    let n = file.read(buf)?;
    Ok(n as isize)
}

pub fn sys_write(fd: i32, buf_ptr: u64, buf_len: u64) -> KResult<isize> {
    let task = scheduler::current_task();
    let file = task.fd_table.lock().get(fd)?;
    // SAFETY: see `sys_read`.
    let buf = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, buf_len as usize) };
    let n = file.write(buf)?;
    Ok(n as isize)
}

pub fn sys_dup(oldfd: i32) -> KResult<isize> {
    let fd = scheduler::current_task().fd_table.lock().dup(oldfd)?;
    Ok(fd as isize)
}

pub fn sys_dup2(oldfd: i32, newfd: i32) -> KResult<isize> {
    let fd = scheduler::current_task().fd_table.lock().dup2(oldfd, newfd)?;
    Ok(fd as isize)
}
