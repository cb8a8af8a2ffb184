//! Process/thread control block (C5).

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::fs::FdTable;
use crate::hal::Context;
use crate::mm::vas::AddressSpace;
use crate::mm::VAddr;

pub type Pid = u64;

/// The user heap region tracked in the PCB: `brk`'s bookkeeping. `start`
/// and `max` are fixed at task creation; `end` is the current break,
/// moved by `sys_brk`.
#[derive(Debug, Clone, Copy)]
pub struct HeapState {
    pub start: VAddr,
    pub end: VAddr,
    pub max: VAddr,
}

impl HeapState {
    pub const fn empty() -> Self {
        Self {
            start: VAddr::new(0),
            end: VAddr::new(0),
            max: VAddr::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The PCB slot this task occupied has been freed back to the
    /// scheduler's table; this `Task` value is a dead remnant of a
    /// reference that outlived its slot (e.g. an `Arc` clone a caller held
    /// across the `Zombie`/`Terminated` -> free transition).
    Unused,
    Ready,
    Running,
    Blocked,
    /// Exited with a live parent; retained until that parent's `waitpid`
    /// reaps it.
    Zombie,
    /// Exited as an orphan (or killed via self-`kill`, which spec.md
    /// treats as never-waitable): resources already released, about to be
    /// dropped from the task table outright.
    Terminated,
}

/// Fixed priority levels the ready queue schedules between; lower number
/// is higher priority. Matches spec.md's "FIFO within priority" contract.
pub const PRIORITY_LEVELS: usize = 4;
pub const DEFAULT_PRIORITY: u8 = 2;

pub struct Task {
    pub pid: Pid,
    /// Weak reference to the parent; cleared to `None` when a live task's
    /// parent exits first (it becomes an orphan -- spec.md's "re-parent to
    /// null", since this kernel has no init-adoption task to re-parent
    /// onto).
    pub parent: Mutex<Option<Pid>>,
    pub priority: u8,
    pub state: Mutex<TaskState>,
    pub context: Mutex<Context>,
    pub kernel_stack_top: usize,
    /// Replaced wholesale by a successful `execve`; every other operation
    /// only ever reads it.
    pub address_space: Mutex<Arc<AddressSpace>>,
    pub exit_code: Mutex<Option<i32>>,
    /// Set alongside `exit_code` when the task was terminated by
    /// `sys_kill` rather than its own `sys_exit`; `wait`'s status encoding
    /// branches on this.
    pub exit_signaled: Mutex<bool>,
    pub children: Mutex<Vec<Pid>>,
    pub fd_table: Mutex<FdTable>,
    pub heap: Mutex<HeapState>,
    pub cwd: Mutex<String>,
    /// Set once, at `execve`, from the path passed to it; used only for
    /// `uname`/diagnostics, never re-parsed by the kernel.
    pub name: Mutex<String>,
}

impl Task {
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state(), TaskState::Zombie)
    }

    pub fn parent_pid(&self) -> Option<Pid> {
        *self.parent.lock()
    }

    pub fn address_space(&self) -> Arc<AddressSpace> {
        self.address_space.lock().clone()
    }

    pub fn set_address_space(&self, space: Arc<AddressSpace>) {
        *self.address_space.lock() = space;
    }
}
