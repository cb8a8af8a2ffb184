//! `sys_kill` (C6 / spec.md 4.5 "Kill").

use crate::error::{KernelError, KResult};
use crate::sched::scheduler::{self, finish_exit};
use crate::sched::task::Pid;

/// Terminates `pid` with the given signal number, POSIX-style. Killing
/// the caller's own pid is indistinguishable from any other kill target
/// except in one respect spec.md calls out explicitly: it forces the
/// task straight to TERMINATED rather than ZOMBIE, since nothing can
/// ever `waitpid` a task that kills itself mid-syscall.
pub fn kill(pid: Pid, signal: i32) -> KResult<()> {
    let target = scheduler::lookup(pid).ok_or(KernelError::NoSuchProcess { pid })?;
    let current = scheduler::current_task();
    let is_self = target.pid == current.pid;

    finish_exit(&target, 128 + signal, true, is_self);

    if is_self {
        scheduler::schedule();
        unreachable!("process::signal::kill: self-kill did not switch away");
    }
    Ok(())
}
