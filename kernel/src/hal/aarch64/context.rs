//! AArch64 context switch (C4): callee-saved `x19-x30`, `sp`, `elr_el1`,
//! `spsr_el1`, and `ttbr0_el1` for the per-task user translation table
//! root.

use cortex_a::registers::TTBR0_EL1;
use tock_registers::interfaces::{Readable, Writeable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub x29: u64, // frame pointer
    pub lr: u64,  // x30
    pub sp: u64,
    pub elr: u64,  // resume PC for the user-return path
    pub spsr: u64, // saved processor state for `eret`
    pub ttbr0: u64,
    pub privilege: Privilege,
    pub user_sp: u64,
}

impl Context {
    pub const fn empty() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x29: 0,
            lr: 0,
            sp: 0,
            elr: 0,
            spsr: 0x3c5, // EL1h, interrupts masked until the trampoline unmasks
            ttbr0: 0,
            privilege: Privilege::Kernel,
            user_sp: 0,
        }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn kernel_thread_trampoline() -> ! {
    core::arch::naked_asm!(
        "msr daifclr, #2", // unmask IRQs
        "ldr x0, [sp], #16",
        "blr x0",
        "mov x0, #0",
        "bl {task_exit}",
        "2: wfi",
        "b 2b",
        task_exit = sym crate::sched::task_exit_trampoline,
    )
}

pub fn context_init(ctx: &mut Context, entry: usize, stack_top: usize, is_user: bool) {
    if is_user {
        ctx.privilege = Privilege::User;
        ctx.elr = entry as u64;
        ctx.user_sp = stack_top as u64;
        ctx.spsr = 0; // EL0t, interrupts unmasked
    } else {
        ctx.privilege = Privilege::Kernel;
        let sp = (stack_top - 16) as u64;
        // SAFETY: 16 bytes below a freshly allocated kernel stack's top,
        // owned exclusively by this task; kept 16-byte aligned per AAPCS64.
        unsafe {
            core::ptr::write(sp as *mut u64, entry as u64);
        }
        ctx.sp = sp;
        ctx.lr = kernel_thread_trampoline as usize as u64;
        ctx.spsr = 0x3c5; // EL1h, IRQs masked until the trampoline clears them
    }
    ctx.ttbr0 = TTBR0_EL1.get();
}

/// # Safety
/// Caller must hold interrupts disabled; both contexts must be valid.
pub unsafe fn context_switch(old: Option<&mut Context>, new: &Context) {
    if let Some(old) = old {
        // SAFETY: reading live register/system state is always valid.
        unsafe {
            core::arch::asm!("mov {}, sp", out(reg) old.sp);
        }
        old.ttbr0 = TTBR0_EL1.get();
        old.lr = return_here as usize as u64;
    }

    if TTBR0_EL1.get() != new.ttbr0 {
        TTBR0_EL1.set(new.ttbr0);
        // SAFETY: TLBI + ISB is the architected sequence after changing
        // the translation table root.
        unsafe {
            core::arch::asm!("tlbi vmalle1", "dsb sy", "isb");
        }
    }

    match new.privilege {
        Privilege::Kernel => {
            // SAFETY: `new.sp`/`new.lr` were seeded by `context_init` or
            // captured by a prior switch of this same context.
            unsafe {
                core::arch::asm!(
                    "mov sp, {sp}",
                    "br {pc}",
                    sp = in(reg) new.sp,
                    pc = in(reg) new.lr,
                    options(noreturn)
                );
            }
        }
        Privilege::User => {
            // SAFETY: ELR_EL1/SPSR_EL1/SP_EL0 fully determine the `eret`
            // target; all three are set from a context this function's
            // contract guarantees is valid.
            unsafe {
                core::arch::asm!(
                    "msr sp_el0, {usp}",
                    "msr elr_el1, {elr}",
                    "msr spsr_el1, {spsr}",
                    "eret",
                    usp = in(reg) new.user_sp,
                    elr = in(reg) new.elr,
                    spsr = in(reg) new.spsr,
                    options(noreturn)
                );
            }
        }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn return_here() {
    core::arch::naked_asm!("ret")
}

pub fn set_kernel_stack(top: usize) {
    crate::hal::aarch64::irq::set_el0_exception_stack(top as u64);
}

use crate::hal::aarch64::mmu::AddressSpaceHandle;
use crate::hal::aarch64::syscall_entry::TrapFrame;

/// See the x86_64 counterpart: seeds a context that resumes a forked
/// child straight into user mode from a copy of the parent's trap frame.
pub fn context_init_fork(
    ctx: &mut Context,
    stack_top: usize,
    frame: TrapFrame,
    space: AddressSpaceHandle,
) {
    ctx.ttbr0 = space.root.as_u64();
    let frame_size = core::mem::size_of::<TrapFrame>();
    let frame_addr = stack_top - frame_size;
    // SAFETY: within the child's freshly allocated, exclusively owned
    // kernel stack.
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, frame);
    }
    let ptr_slot = frame_addr - 16; // keep sp 16-byte aligned, AAPCS64
    // SAFETY: see above.
    unsafe {
        core::ptr::write(ptr_slot as *mut u64, frame_addr as u64);
    }
    ctx.sp = ptr_slot as u64;
    ctx.lr = fork_child_trampoline as usize as u64;
    ctx.spsr = 0x3c5;
    ctx.privilege = Privilege::Kernel;
}

#[unsafe(naked)]
unsafe extern "C" fn fork_child_trampoline() -> ! {
    core::arch::naked_asm!(
        "ldr x9, [sp], #16", // &TrapFrame, seeded by context_init_fork
        "ldr x10, [x9, #72]", // stash user_sp
        "ldr x0, [x9, #0]",
        "ldr x1, [x9, #8]",
        "ldr x2, [x9, #16]",
        "ldr x3, [x9, #24]",
        "ldr x4, [x9, #32]",
        "ldr x5, [x9, #40]",
        "ldr x8, [x9, #48]",
        "ldr x11, [x9, #56]",
        "msr elr_el1, x11",
        "ldr x11, [x9, #64]",
        "msr spsr_el1, x11",
        "msr sp_el0, x10",
        "eret",
    )
}
