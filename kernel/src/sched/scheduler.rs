//! Cooperative, timer-preempted round-robin scheduler (C5).
//!
//! A single global run queue and current-task pointer -- this kernel has
//! no SMP story, so there is exactly one thing "running" at a time and no
//! need for per-CPU scheduler state.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::fs::FdTable;
use crate::hal::{self, AddressSpaceHandle};
use crate::mm::vas::AddressSpace;

use super::queue::ReadyQueue;
use super::task::{HeapState, Pid, Task, TaskState, DEFAULT_PRIORITY};

/// Timer ticks a task runs before being preempted.
const TIME_SLICE_TICKS: u32 = 10;

/// Fixed PCB table capacity (spec.md 3's "a fixed-size table of PCB slots
/// (MAX_TASKS, typically 64-256)").
pub const MAX_TASKS: usize = 128;

static TICKS_LEFT: AtomicUsize = AtomicUsize::new(TIME_SLICE_TICKS as usize);
/// Monotonic timer-interrupt count since `init()`, the one time source
/// this kernel has; `SYS_TIME`/`SYS_NANOSLEEP` are both built on it
/// (SPEC_FULL.md 11) rather than inventing a second clock.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// One PCB slot: the occupant (`None` once UNUSED) and a generation counter
/// bumped every time the slot is freed, so a stale `Pid` formed from a
/// reused slot index is rejected rather than silently resolving to
/// whatever task now lives there (spec.md 9: "PCB references as slot index
/// + generation, not raw pointers").
struct Slot {
    task: Option<Arc<Task>>,
    generation: u32,
    /// Set between `reserve` and `install`/`release`, so a second caller
    /// racing the same scan never double-allocates this slot.
    reserved: bool,
}

struct TaskTable {
    slots: [Slot; MAX_TASKS],
}

impl TaskTable {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                task: None,
                generation: 0,
                reserved: false,
            }),
        }
    }

    fn reserve(&mut self) -> KResult<Pid> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.task.is_none() && !slot.reserved {
                slot.reserved = true;
                return Ok(pack_pid(index, slot.generation));
            }
        }
        Err(KernelError::NoFreeTask)
    }

    fn release(&mut self, pid: Pid) {
        if let Some(slot) = self.slots.get_mut(slot_index(pid)) {
            slot.reserved = false;
        }
    }

    fn install(&mut self, task: Arc<Task>) {
        if let Some(slot) = self.slots.get_mut(slot_index(task.pid)) {
            slot.task = Some(task);
            slot.reserved = false;
        }
    }

    fn get(&self, pid: Pid) -> Option<Arc<Task>> {
        let slot = self.slots.get(slot_index(pid))?;
        if slot.generation == generation_of(pid) {
            slot.task.clone()
        } else {
            None
        }
    }

    /// Drops the slot's task (if its generation still matches `pid`) and
    /// bumps the generation, returning this PID to UNUSED and making the
    /// slot eligible for `reserve` again.
    fn free(&mut self, pid: Pid) {
        if let Some(slot) = self.slots.get_mut(slot_index(pid)) {
            if slot.generation == generation_of(pid) {
                slot.task = None;
                slot.reserved = false;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }
}

fn pack_pid(index: usize, generation: u32) -> Pid {
    ((generation as u64) << 32) | index as u64
}

fn slot_index(pid: Pid) -> usize {
    (pid & 0xFFFF_FFFF) as usize
}

fn generation_of(pid: Pid) -> u32 {
    (pid >> 32) as u32
}

lazy_static! {
    static ref READY: ReadyQueue = ReadyQueue::new();
    static ref TASKS: Mutex<TaskTable> = Mutex::new(TaskTable::new());
    static ref CURRENT: Mutex<Option<Arc<Task>>> = Mutex::new(None);
    static ref KERNEL_SPACE: Arc<AddressSpace> = Arc::new(AddressSpace::current());
}

/// Reserves a free PCB slot for a task under construction, failing with
/// [`KernelError::NoFreeTask`] once all `MAX_TASKS` slots are live. A
/// caller that goes on to fail before `register_task` must call
/// [`release_pid`] to give the slot back.
pub fn alloc_pid() -> KResult<Pid> {
    TASKS.lock().reserve()
}

/// Releases a slot reserved by `alloc_pid` whose task was never actually
/// built (e.g. fork failing to allocate a kernel stack after its PID was
/// already reserved).
pub fn release_pid(pid: Pid) {
    TASKS.lock().release(pid);
}

pub fn register_task(task: Arc<Task>) {
    TASKS.lock().install(task.clone());
    READY.push(task);
}

pub fn lookup(pid: Pid) -> Option<Arc<Task>> {
    TASKS.lock().get(pid)
}

/// Returns `pid`'s slot to UNUSED: the task is dropped from the table and
/// the slot's generation is bumped so this exact `Pid` is never handed
/// back out.
pub fn remove_task(pid: Pid) {
    let mut table = TASKS.lock();
    if let Some(task) = table.get(pid) {
        task.set_state(TaskState::Unused);
    }
    table.free(pid);
}

pub fn kernel_address_space() -> Arc<AddressSpace> {
    KERNEL_SPACE.clone()
}

/// Brings up the idle task: the context bootstrap.rs is already running
/// on, adopted as PID 0 (spec.md's Glossary: "Idle task -- PID 0; always
/// runnable; run when no other task is ready") so `current_task`/
/// `schedule` have something to switch away from. This is literally the
/// bootstrap loop's own final `loop { schedule() }` -- the same "run
/// when nothing else is" role an idle task has, rather than a second
/// purpose-built spin loop.
pub fn init() {
    let pid = TASKS
        .lock()
        .reserve()
        .expect("pcb table has no free slots at boot");
    let task = Arc::new(Task {
        pid,
        parent: Mutex::new(None),
        priority: DEFAULT_PRIORITY,
        state: Mutex::new(TaskState::Running),
        context: Mutex::new(hal::Context::empty()),
        kernel_stack_top: 0,
        address_space: Mutex::new(KERNEL_SPACE.clone()),
        exit_code: Mutex::new(None),
        exit_signaled: Mutex::new(false),
        children: Mutex::new(alloc::vec::Vec::new()),
        fd_table: Mutex::new(FdTable::new()),
        heap: Mutex::new(HeapState::empty()),
        cwd: Mutex::new(alloc::string::String::from("/")),
        name: Mutex::new(alloc::string::String::from("idle")),
    });
    TASKS.lock().install(task.clone());
    *CURRENT.lock() = Some(task);
    log::info!("sched: scheduler initialized, idle task is pid {}", current_task().pid);
}

pub fn current_task() -> Arc<Task> {
    CURRENT
        .lock()
        .clone()
        .expect("sched::current_task called before sched::init")
}

pub fn current_address_space() -> AddressSpaceHandle {
    current_task().address_space().handle()
}

/// Called from every architecture's timer-interrupt handler. Decrements
/// the current time slice and reschedules once it is exhausted.
pub fn on_timer_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let remaining = TICKS_LEFT.fetch_sub(1, Ordering::Relaxed);
    if remaining <= 1 {
        TICKS_LEFT.store(TIME_SLICE_TICKS as usize, Ordering::Relaxed);
        schedule();
    }
}

/// Ticks elapsed since boot. One tick is one timer-interrupt period,
/// architecture-dependent (100ms on the AArch64 generic timer config
/// this kernel installs, ~10ms on the PIT/APIC-timer configs) -- callers
/// needing wall-clock time convert through that known period themselves.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Voluntary yield: the current task gives up the remainder of its slice.
pub fn yield_now() {
    TICKS_LEFT.store(TIME_SLICE_TICKS as usize, Ordering::Relaxed);
    schedule();
}

/// Picks the next ready task and switches to it, re-enqueuing the current
/// task first if it is still runnable. A no-op if the ready queue is
/// empty (nothing preempts the current task).
pub fn schedule() {
    hal::with_irq_disabled(|| {
        // A task can be killed while it is sitting in the ready queue,
        // not currently running; its entry is left in place (the queue
        // has no by-pid removal) and simply skipped here once popped.
        let next = loop {
            match READY.pop() {
                Some(task) if task.state() == TaskState::Ready => break task,
                Some(_) => continue,
                None => return,
            }
        };
        let prev = current_task();
        if next.pid == prev.pid {
            // The only ready task is the one already running (e.g. a
            // single-task system taking a timer tick) -- nothing to
            // switch, and locking `next.context` a second time here
            // would deadlock against `prev.context`.
            next.set_state(TaskState::Running);
            return;
        }
        if matches!(prev.state(), TaskState::Running) {
            prev.set_state(TaskState::Ready);
            READY.push(prev.clone());
        }
        next.set_state(TaskState::Running);
        *CURRENT.lock() = Some(next.clone());
        hal::set_kernel_stack(next.kernel_stack_top);
        next.address_space().switch_to();

        let mut prev_ctx = prev.context.lock();
        let next_ctx = next.context.lock();
        // SAFETY: interrupts are disabled for the duration of this block
        // (`with_irq_disabled`); both contexts belong to tasks registered
        // with the scheduler and are never freed while runnable.
        unsafe {
            hal::context_switch(Some(&mut prev_ctx), &next_ctx);
        }
    });
}

/// Terminates the current task with the given exit status, never
/// returning to the caller. Used both by `sys_exit` and by the page-fault
/// service delivering a fatal signal (whose numeric value is folded into
/// the POSIX `128 + signal` convention).
pub fn terminate_current(signal: i32) -> ! {
    exit_current(128 + signal);
    unreachable!("terminate_current: schedule() switched away permanently");
}

pub fn exit_current(code: i32) -> ! {
    let current = current_task();
    finish_exit(&current, code, false, false);
    schedule();
    unreachable!("exit_current: schedule() switched away permanently");
}

/// Shared exit bookkeeping between a task's own `sys_exit` and
/// `sys_kill`'s "terminate" semantics: record the exit status, orphan any
/// live children (reaping zombie ones outright), and move the task itself
/// to ZOMBIE if its parent is alive or TERMINATED if it is an orphan --
/// `force_terminated` additionally forces TERMINATED regardless of parent,
/// per spec.md's "killing self from sys_kill marks TERMINATED, not ZOMBIE,
/// because no waitpid on a self-kill is meaningful".
pub fn finish_exit(task: &Arc<Task>, code: i32, signaled: bool, force_terminated: bool) {
    *task.exit_code.lock() = Some(code);
    *task.exit_signaled.lock() = signaled;
    for child_pid in task.children.lock().drain(..) {
        let Some(child) = lookup(child_pid) else {
            continue;
        };
        if child.is_zombie() {
            remove_task(child_pid);
        } else {
            *child.parent.lock() = None;
        }
    }
    let has_parent = task.parent_pid().is_some();
    if !force_terminated && has_parent {
        task.set_state(TaskState::Zombie);
    } else {
        task.set_state(TaskState::Terminated);
        remove_task(task.pid);
    }
}
