//! `sys_waitpid` (C6 / spec.md 4.5 "Exit / wait").

use crate::error::{KernelError, KResult};
use crate::sched::scheduler;
use crate::sched::task::{Pid, TaskState};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        const NONE = 0;
        const WNOHANG = 1 << 0;
    }
}

pub const WAIT_NO_HANG: WaitOptions = WaitOptions::WNOHANG;

/// POSIX `wstatus` encoding: low byte is the delivering signal when the
/// child was signaled (spec.md's `128 + signal` exit-code convention is
/// the inverse of this at the `waitpid` boundary), otherwise the exit
/// code shifted up by 8, matching glibc's `WIFEXITED`/`WEXITSTATUS`.
fn encode_status(code: i32, signaled: bool) -> i32 {
    if signaled {
        code - 128
    } else {
        (code & 0xff) << 8
    }
}

/// Reap one of the caller's zombie children, per spec.md 4.5: if `pid` is
/// `-1`, any zombie child qualifies; otherwise only that exact pid. With
/// [`WaitOptions::WNOHANG`] unset and no zombie yet available (but at
/// least one live child remains), the caller blocks by yielding and
/// retrying rather than returning early -- this kernel has no explicit
/// wait-queue for exit, so the loop is cooperative polling.
pub fn waitpid(pid: i64, options: WaitOptions) -> KResult<(Pid, i32)> {
    loop {
        let current = scheduler::current_task();
        let children = current.children.lock().clone();
        if children.is_empty() {
            return Err(KernelError::NoSuchChild);
        }

        let mut any_matching_live = false;
        for child_pid in &children {
            if pid != -1 && *child_pid != pid as u64 {
                continue;
            }
            any_matching_live = true;
            let Some(child) = scheduler::lookup(*child_pid) else {
                continue;
            };
            if child.is_zombie() {
                let code = child.exit_code.lock().unwrap_or(0);
                let signaled = *child.exit_signaled.lock();
                current.children.lock().retain(|p| *p != *child_pid);
                scheduler::remove_task(*child_pid);
                return Ok((*child_pid, encode_status(code, signaled)));
            }
        }

        if !any_matching_live {
            return Err(KernelError::NoSuchChild);
        }
        if options.contains(WaitOptions::WNOHANG) {
            return Ok((0, 0));
        }
        scheduler::yield_now();
    }
}
