//! `sys_fork` (C6 / spec.md 4.5).

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::hal::{self, TrapFrame};
use crate::mm::PMM;
use crate::sched::scheduler;
use crate::sched::stack::alloc_kernel_stack;
use crate::sched::task::{Pid, Task, TaskState};

/// Conservative free-frame margin fork refuses to dip below, per spec.md
/// 4.5 step 2 ("e.g. 64").
const FORK_FRAME_MARGIN: usize = 64;

/// Clone the calling task into a new child, returning the child's PID to
/// the parent. `frame` is the parent's saved user-mode register state at
/// the syscall boundary; the child's own saved context is seeded from a
/// copy of it with the return register forced to 0 (spec.md P8).
///
/// The entire operation runs with interrupts disabled (spec.md 5,
/// "fork is atomic w.r.t. the scheduler and interrupt delivery") via
/// [`hal::with_irq_disabled`].
pub fn fork(frame: &TrapFrame) -> KResult<Pid> {
    hal::with_irq_disabled(|| fork_locked(frame))
}

fn fork_locked(frame: &TrapFrame) -> KResult<Pid> {
    let free = PMM.get_info().free;
    if free < FORK_FRAME_MARGIN {
        return Err(KernelError::OutOfMemory {
            requested: FORK_FRAME_MARGIN,
            available: free,
        });
    }

    let parent = scheduler::current_task();
    // Reserve the child's PCB slot first (spec.md 4.5 step 4 lists "allocate
    // a child PCB" before cloning the address space or the kernel stack):
    // if either of those later steps fails, the slot is given back rather
    // than leaked.
    let child_pid = scheduler::alloc_pid()?;

    let child_space = match parent.address_space().clone_for_fork() {
        Ok(space) => Arc::new(space),
        Err(err) => {
            scheduler::release_pid(child_pid);
            return Err(err);
        }
    };
    let child_stack_top = match alloc_kernel_stack() {
        Ok(top) => top,
        Err(err) => {
            scheduler::release_pid(child_pid);
            return Err(err);
        }
    };

    let mut child_frame = *frame;
    child_frame.set_return(0);

    let mut context = hal::Context::empty();
    hal::context_init_fork(&mut context, child_stack_top, child_frame, child_space.handle());

    let child = Arc::new(Task {
        pid: child_pid,
        parent: Mutex::new(Some(parent.pid)),
        priority: parent.priority,
        state: Mutex::new(TaskState::Ready),
        context: Mutex::new(context),
        kernel_stack_top: child_stack_top,
        address_space: Mutex::new(child_space),
        exit_code: Mutex::new(None),
        exit_signaled: Mutex::new(false),
        children: Mutex::new(alloc::vec::Vec::new()),
        fd_table: Mutex::new(parent.fd_table.lock().clone_for_fork()),
        heap: Mutex::new(*parent.heap.lock()),
        cwd: Mutex::new(parent.cwd.lock().clone()),
        name: Mutex::new(parent.name.lock().clone()),
    });

    parent.children.lock().push(child_pid);
    scheduler::register_task(child);

    Ok(child_pid)
}
