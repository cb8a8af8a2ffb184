//! `fork`/`execve`/`waitpid`/`kill` (C6), built on top of [`crate::sched`]
//! and [`crate::mm::vas`]. The PCB itself (`sched::task::Task`) and its
//! lifecycle states live in `sched`; this module is the syscall-facing
//! logic that drives transitions between them.

extern crate alloc;

pub mod exec;
pub mod fork;
pub mod signal;
pub mod wait;

pub use exec::execve;
pub use fork::fork;
pub use signal::kill;
pub use wait::{waitpid, WaitOptions, WAIT_NO_HANG};

pub use crate::sched::{KERNEL_STACK_PAGES, USER_STACK_PAGES};
