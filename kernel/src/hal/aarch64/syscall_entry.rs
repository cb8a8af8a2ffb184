//! `svc #0` syscall entry on AArch64.

/// Registers saved by the `svc` exception-vector slot, portable argument
/// order from spec.md §6: `x8` carries the syscall number (AAPCS64's
/// indirect-result convention repurposed the way Linux/arm64 does it),
/// `x0-x5` are arguments 0-5, and the return value goes back in `x0`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub x0: u64,
    pub x1: u64,
    pub x2: u64,
    pub x3: u64,
    pub x4: u64,
    pub x5: u64,
    pub x8: u64,
    pub elr: u64,
    pub spsr: u64,
    pub user_sp: u64,
}

impl TrapFrame {
    pub fn args(&self) -> [u64; 6] {
        [self.x0, self.x1, self.x2, self.x3, self.x4, self.x5]
    }

    pub fn syscall_number(&self) -> u64 {
        self.x8
    }

    pub fn set_return(&mut self, value: isize) {
        self.x0 = value as u64;
    }

    /// Overwrites the `eret` return state for `sys_execve`: resumes at a
    /// fresh entry point and stack instead of where the syscall was
    /// issued from.
    pub fn set_exec_return(&mut self, entry: u64, stack_top: u64) {
        self.elr = entry;
        self.user_sp = stack_top;
        self.spsr = 0; // EL0t, interrupts unmasked
    }
}

static mut KERNEL_SYSCALL_STACK_TOP: u64 = 0;

pub fn set_kernel_syscall_stack(top: u64) {
    // SAFETY: only written from single-threaded boot/scheduler code with
    // interrupts disabled.
    unsafe {
        KERNEL_SYSCALL_STACK_TOP = top;
    }
}

/// `svc` traps through the shared exception-vector table (`irq.rs`); no
/// separate MSR-based fast path to install, unlike x86_64.
pub fn init() {}

pub(super) extern "C" fn dispatch_syscall(frame: *mut TrapFrame) {
    // SAFETY: `frame` points at the trap frame the `sync_el0_64` vector
    // slot built on the kernel stack, matching `TrapFrame`'s field order.
    let frame = unsafe { &mut *frame };
    crate::syscall::dispatch(frame);
}
