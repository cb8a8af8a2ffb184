//! `syscall`/`sysret` fast path (C6's entry point on x86_64).
//!
//! `int 0x80` (see `irq.rs`'s `legacy_syscall_handler`) is wired up only
//! for calling-convention parity with i686; this is the path real
//! userspace code takes.

use x86_64::registers::model_specific::{Efer, EferFlags, LStar, SFMask, Star};
use x86_64::registers::rflags::RFlags;
use x86_64::VirtAddr;

/// Registers saved on syscall entry, in the order the portable syscall
/// ABI (spec.md §6) expects: `rax` is the syscall number on entry and the
/// return value on exit; `rdi, rsi, rdx, r10, r8, r9` are arguments 0-5.
/// `sys_fork`/`sys_execve` read and mutate this structure directly since
/// a fork's child and an execve's fresh register state are expressed as
/// edits to the trap frame, not as separate return paths.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub r9: u64,
    pub r8: u64,
    pub r10: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rax: u64,
    /// Saved by `syscall`: user `rip` to return to.
    pub rcx: u64,
    /// Saved by `syscall`: user `rflags` to restore.
    pub r11: u64,
    pub user_rsp: u64,
}

impl TrapFrame {
    pub fn args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    pub fn syscall_number(&self) -> u64 {
        self.rax
    }

    pub fn set_return(&mut self, value: isize) {
        self.rax = value as u64;
    }

    /// Overwrites the `sysretq` return state so dispatch resumes at a
    /// fresh entry point and stack rather than the point the syscall was
    /// issued from -- `sys_execve`'s only way to "jump into" the new
    /// image (spec.md 4.5 "Execve").
    pub fn set_exec_return(&mut self, entry: u64, stack_top: u64) {
        self.rcx = entry;
        self.user_rsp = stack_top;
        self.r11 = 0x202; // rflags restored by sysretq: IF=1, ring 3
    }
}

/// Per-CPU kernel stack the `syscall` entry stub switches to before
/// saving user state. Single-CPU for now, matching the rest of this
/// kernel's concurrency model.
static mut KERNEL_SYSCALL_STACK_TOP: u64 = 0;

pub fn set_kernel_syscall_stack(top: u64) {
    // SAFETY: only ever written from single-threaded boot/scheduler code
    // with interrupts disabled, and only read by the naked entry stub
    // below under the same discipline.
    unsafe {
        KERNEL_SYSCALL_STACK_TOP = top;
    }
}

/// Installs `LSTAR`/`STAR`/`SFMASK` and enables `syscall`/`sysret` via
/// `EFER.SCE`.
pub fn init() {
    Star::write(
        x86_64::structures::gdt::SegmentSelector(0x1B), // user32 placeholder, unused by sysretq
        x86_64::structures::gdt::SegmentSelector(0x23),
        x86_64::structures::gdt::SegmentSelector(0x08),
        x86_64::structures::gdt::SegmentSelector(0x10),
    )
    .expect("STAR selectors must be correctly ordered for sysret");
    LStar::write(VirtAddr::new(syscall_entry as usize as u64));
    SFMask::write(RFlags::INTERRUPT_FLAG | RFlags::DIRECTION_FLAG);
    // SAFETY: enabling `syscall`/`sysret` support, standard MSR write.
    unsafe {
        Efer::update(|flags| *flags |= EferFlags::SYSTEM_CALL_EXTENSIONS);
    }
}

/// Entry point named by `LSTAR`. Runs with interrupts disabled (per
/// `SFMASK`) and the user's `rsp` still live in `rsp` -- the first order
/// of business is swapping onto a kernel stack before touching memory
/// that could fault.
#[unsafe(naked)]
unsafe extern "C" fn syscall_entry() -> ! {
    core::arch::naked_asm!(
        "mov [{scratch} + 0], rsp",   // stash user rsp
        "mov rsp, [{stack_top}]",
        "push qword ptr [{scratch} + 0]", // user_rsp
        "push r11",
        "push rcx",
        "push rax",
        "push rdi",
        "push rsi",
        "push rdx",
        "push r10",
        "push r8",
        "push r9",
        "mov rdi, rsp",               // &mut TrapFrame
        "call {dispatch}",
        "pop r9",
        "pop r8",
        "pop r10",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rax",
        "pop rcx",
        "pop r11",
        "pop rsp",
        "sysretq",
        scratch = sym USER_RSP_SCRATCH,
        stack_top = sym KERNEL_SYSCALL_STACK_TOP,
        dispatch = sym dispatch_trampoline,
    )
}

static mut USER_RSP_SCRATCH: u64 = 0;

extern "C" fn dispatch_trampoline(frame: *mut TrapFrame) {
    // SAFETY: `frame` points at the trap frame just built on the kernel
    // stack by `syscall_entry`'s push sequence, which matches
    // `TrapFrame`'s field order exactly.
    let frame = unsafe { &mut *frame };
    crate::syscall::dispatch(frame);
}
