//! x86_64 context switch implementation (C4).

use core::arch::asm;

/// Which return path `context_switch` takes when dispatching this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

/// x86_64 CPU context. Only the callee-saved registers plus the handful of
/// fields the switch path itself needs are stored here; caller-saved
/// registers are already on the stack by the time a context switch
/// happens (it is always called from a Rust function, never from raw
/// interrupt entry).
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    /// Stack pointer at the point execution will resume.
    pub rsp: u64,
    /// Saved program counter / entry point.
    pub rip: u64,
    pub rflags: u64,
    pub cr3: u64,
    pub privilege: Privilege,
    /// User-mode stack pointer (only meaningful when `privilege ==
    /// Privilege::User`); restored into `rsp` during the privilege-change
    /// frame build.
    pub user_rsp: u64,
}

impl Context {
    pub const fn empty() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            rsp: 0,
            rip: 0,
            rflags: 0x202, // IF=1
            cr3: 0,
            privilege: Privilege::Kernel,
            user_rsp: 0,
        }
    }
}

/// Trampoline every fresh kernel context's `rip` points at: enables
/// interrupts, pops the real entry address the seeded stack carries, calls
/// it, and exits the task if it returns.
#[unsafe(naked)]
unsafe extern "C" fn kernel_thread_trampoline() -> ! {
    core::arch::naked_asm!(
        "sti",
        "pop rdi",      // real entry point, seeded onto the stack by context_init
        "call rdi",
        "mov rdi, 0",
        "call {task_exit}",
        "2: hlt",
        "jmp 2b",
        task_exit = sym crate::sched::task_exit_trampoline,
    )
}

pub fn context_init(ctx: &mut Context, entry: usize, stack_top: usize, is_user: bool) {
    if is_user {
        // Build a stack frame with nothing pre-seeded; context_switch's
        // "to user" path constructs the iretq frame directly from `rip`
        // and `user_rsp`.
        ctx.privilege = Privilege::User;
        ctx.rip = entry as u64;
        ctx.user_rsp = stack_top as u64;
        ctx.rflags = 0x202; // IF=1, ring 3
    } else {
        ctx.privilege = Privilege::Kernel;
        // Seed the real entry point just below the initial SP so the
        // trampoline's `pop rdi` retrieves it.
        let sp = (stack_top - core::mem::size_of::<u64>()) as u64;
        // SAFETY: `stack_top` is the top of a freshly allocated kernel
        // stack owned by this task; writing one word below it is in
        // bounds.
        unsafe {
            core::ptr::write((sp) as *mut u64, entry as u64);
        }
        ctx.rsp = sp;
        ctx.rip = kernel_thread_trampoline as usize as u64;
        ctx.rflags = 0x002; // IF=0 until the trampoline's `sti`
    }
    // SAFETY: reading CR3 only observes current kernel state.
    ctx.cr3 = unsafe {
        let cr3: u64;
        asm!("mov {}, cr3", out(reg) cr3);
        cr3
    };
}

/// # Safety
/// Caller must hold interrupts disabled and both contexts must be valid.
pub unsafe fn context_switch(old: Option<&mut Context>, new: &Context) {
    if let Some(old) = old {
        // SAFETY: reading live register/control state is always valid.
        unsafe {
            asm!("mov {}, rsp", out(reg) old.rsp);
            asm!("pushfq; pop {}", out(reg) old.rflags);
            let cr3: u64;
            asm!("mov {}, cr3", out(reg) cr3);
            old.cr3 = cr3;
        }
        old.rip = return_here as usize as u64;
    }

    // SAFETY: `new.cr3` is a page-table root installed by mm::vas for a
    // live address space.
    unsafe {
        let current: u64;
        asm!("mov {}, cr3", out(reg) current);
        if current != new.cr3 {
            asm!("mov cr3, {}", in(reg) new.cr3);
        }
    }

    match new.privilege {
        Privilege::Kernel => {
            // SAFETY: `new.rsp`/`new.rip` were seeded by `context_init` or
            // captured by a prior `context_switch` of this same context.
            unsafe {
                asm!(
                    "mov rsp, {sp}",
                    "push {flags}",
                    "popfq",
                    "jmp {pc}",
                    sp = in(reg) new.rsp,
                    flags = in(reg) new.rflags,
                    pc = in(reg) new.rip,
                    options(noreturn)
                );
            }
        }
        Privilege::User => {
            // SAFETY: builds the canonical iretq privilege-change frame:
            // SS, RSP, RFLAGS, CS, RIP, in that push order, ring-3
            // selectors per the teacher kernel's GDT layout.
            unsafe {
                asm!(
                    "push {ss}",
                    "push {usp}",
                    "push {flags}",
                    "push {cs}",
                    "push {pc}",
                    "iretq",
                    ss = in(reg) 0x2Bu64,
                    usp = in(reg) new.user_rsp,
                    flags = in(reg) new.rflags | 0x200,
                    cs = in(reg) 0x33u64,
                    pc = in(reg) new.rip,
                    options(noreturn)
                );
            }
        }
    }
}

/// Label `old.rip` points at after a future switch back to this context;
/// this is the ordinary-return path for a kernel-to-kernel switch.
#[unsafe(naked)]
unsafe extern "C" fn return_here() {
    core::arch::naked_asm!("ret")
}

pub fn set_kernel_stack(top: usize) {
    crate::hal::x86_64::irq::set_tss_rsp0(top as u64);
}

use crate::hal::x86_64::mmu::AddressSpaceHandle;
use crate::hal::x86_64::syscall_entry::TrapFrame;

/// Seeds a context whose first dispatch resumes directly into user mode
/// through a copy of a trap frame, rather than through
/// `kernel_thread_trampoline`'s call-an-entry-point path. This is how a
/// forked child first runs: it has no kernel entry point of its own, only
/// the parent's saved registers at the moment of the `fork` syscall.
pub fn context_init_fork(
    ctx: &mut Context,
    stack_top: usize,
    frame: TrapFrame,
    space: AddressSpaceHandle,
) {
    ctx.cr3 = space.root.as_u64();
    let frame_size = core::mem::size_of::<TrapFrame>();
    let frame_addr = stack_top - frame_size;
    // SAFETY: `stack_top` is the top of a freshly allocated kernel stack
    // owned exclusively by the child task; `frame_size` bytes below it is
    // in bounds.
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, frame);
    }
    let ptr_slot = frame_addr - core::mem::size_of::<u64>();
    // SAFETY: one word further below, still within the same stack.
    unsafe {
        core::ptr::write(ptr_slot as *mut u64, frame_addr as u64);
    }
    ctx.rsp = ptr_slot as u64;
    ctx.rip = fork_child_trampoline as usize as u64;
    ctx.rflags = 0x002;
    ctx.privilege = Privilege::Kernel; // dispatched like a kernel context; it performs its own sysretq
}

/// Restores a forked child's saved trap frame and resumes it in user mode
/// via `sysretq`. Field offsets match `TrapFrame`'s declared order
/// exactly.
#[unsafe(naked)]
unsafe extern "C" fn fork_child_trampoline() -> ! {
    core::arch::naked_asm!(
        "pop rdi",             // &TrapFrame, seeded by context_init_fork
        "mov r15, [rdi + 72]", // stash user_rsp before rdi is overwritten
        "mov r9,  [rdi + 0]",
        "mov r8,  [rdi + 8]",
        "mov r10, [rdi + 16]",
        "mov rdx, [rdi + 24]",
        "mov rsi, [rdi + 32]",
        "mov rax, [rdi + 48]",
        "mov rcx, [rdi + 56]",
        "mov r11, [rdi + 64]",
        "mov rdi, [rdi + 40]",
        "mov rsp, r15",
        "sysretq",
    )
}
