//! Syscall dispatcher (C6): the single narrowing point between
//! [`crate::error::KernelError`] and the POSIX-style negative-`isize`
//! return value user space sees.

mod file;
mod info;
mod memory;
mod network;
mod process;
mod time;

use crate::error::to_errno;
use crate::hal::TrapFrame;

/// Portable syscall numbers (spec.md §6), grouped by domain: process
/// `0x00xx`, file `0x01xx`, memory `0x02xx`, time `0x03xx`, info `0x05xx`,
/// network `0x06xx`.
pub const SYS_EXIT: u64 = 0x0000;
pub const SYS_FORK: u64 = 0x0001;
pub const SYS_EXECVE: u64 = 0x0002;
pub const SYS_WAITPID: u64 = 0x0003;
pub const SYS_GETPID: u64 = 0x0004;
pub const SYS_GETPPID: u64 = 0x0005;
pub const SYS_KILL: u64 = 0x0006;
pub const SYS_YIELD: u64 = 0x0007;
pub const SYS_NANOSLEEP: u64 = 0x0008;

pub const SYS_OPEN: u64 = 0x0100;
pub const SYS_CLOSE: u64 = 0x0101;
pub const SYS_READ: u64 = 0x0102;
pub const SYS_WRITE: u64 = 0x0103;
pub const SYS_DUP: u64 = 0x0104;
pub const SYS_DUP2: u64 = 0x0105;

pub const SYS_BRK: u64 = 0x0200;
pub const SYS_MMAP: u64 = 0x0201;

pub const SYS_TIME: u64 = 0x0300;

pub const SYS_UNAME: u64 = 0x0500;

pub const SYS_SOCKET: u64 = 0x0600;

/// Entry point every architecture's syscall/trap stub calls with the
/// freshly built trap frame. `sys_fork` and `sys_execve` read and mutate
/// `frame` directly (a forked child's register state, an exec'd image's
/// fresh entry point); everything else goes through the ordinary
/// `args()`/`set_return()` path.
pub fn dispatch(frame: &mut TrapFrame) {
    let num = frame.syscall_number();
    let a = frame.args();

    let result: Result<isize, crate::error::KernelError> = match num {
        SYS_EXIT => process::sys_exit(a[0] as i32),
        SYS_FORK => process::sys_fork(frame),
        SYS_EXECVE => process::sys_execve(a[0], a[1], frame),
        SYS_WAITPID => process::sys_waitpid(a[0] as i64, a[1], a[2] as u32),
        SYS_GETPID => Ok(process::sys_getpid() as isize),
        SYS_GETPPID => Ok(process::sys_getppid() as isize),
        SYS_KILL => process::sys_kill(a[0], a[1] as i32),
        SYS_YIELD => process::sys_yield(),
        SYS_NANOSLEEP => time::sys_nanosleep(a[0]),

        SYS_OPEN => file::sys_open(a[0], a[1]),
        SYS_CLOSE => file::sys_close(a[0] as i32),
        SYS_READ => file::sys_read(a[0] as i32, a[1], a[2]),
        SYS_WRITE => file::sys_write(a[0] as i32, a[1], a[2]),
        SYS_DUP => file::sys_dup(a[0] as i32),
        SYS_DUP2 => file::sys_dup2(a[0] as i32, a[1] as i32),

        SYS_BRK => memory::sys_brk(a[0]),
        SYS_MMAP => memory::sys_mmap(a[0], a[1], a[2]),

        SYS_TIME => Ok(time::sys_time() as isize),

        SYS_UNAME => info::sys_uname(a[0]),

        SYS_SOCKET => network::sys_socket(a[0], a[1]),

        _ => Err(crate::error::KernelError::NotSupported { operation: "unknown syscall" }),
    };

    match result {
        Ok(value) => frame.set_return(value),
        Err(e) => frame.set_return(to_errno(e)),
    }
}
