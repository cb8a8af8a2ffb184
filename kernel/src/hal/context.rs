//! Context switch (C4): the HAL's `context_init`/`context_switch` contract.
//!
//! Context layout is architecture-private; everything above this module
//! treats [`Context`] as opaque. The one exception is the kernel-thread
//! entry trampoline, whose existence (not its layout) matters to
//! [`crate::sched`]: a kernel context's saved program counter always
//! points at the trampoline, which enables interrupts, pops the real
//! entry address off the seeded stack, calls it, and calls
//! `task_exit(0)` if it returns.

use super::arch_impl;

/// Opaque per-architecture CPU context: callee-saved registers, program
/// counter, stack pointer, privilege/segment state, and the address-space
/// root.
pub type Context = arch_impl::context::Context;

/// Seed a fresh context so that when dispatched it begins executing
/// `entry` on the stack at `stack_top`, in user or kernel mode per
/// `is_user`.
pub fn context_init(ctx: &mut Context, entry: usize, stack_top: usize, is_user: bool) {
    arch_impl::context::context_init(ctx, entry, stack_top, is_user);
}

/// Save the caller's CPU state into `*old` (if `Some`) and load `new`,
/// switching the address-space root first if it differs from the one
/// currently live.
///
/// # Safety
/// Must be called with interrupts disabled on the calling CPU; both
/// contexts must be fully initialized. This function does not return to
/// its caller in the ordinary sense -- control resumes wherever `new`'s
/// saved program counter points, which may be a different call site
/// entirely (the next time `old` is switched back to).
pub unsafe fn context_switch(old: Option<&mut Context>, new: &Context) {
    // SAFETY: forwarded from the caller's contract.
    unsafe { arch_impl::context::context_switch(old, new) };
}

/// Update the privilege-transition stack pointer (TSS RSP0 on x86_64, the
/// EL0->EL1 stack pointer on AArch64) so the next user->kernel trap lands
/// on `top`.
pub fn context_set_kernel_stack(top: usize) {
    arch_impl::context::set_kernel_stack(top);
}

/// Seed a context that resumes a forked child directly in user mode from
/// a copy of the parent's trap frame, rather than through the ordinary
/// kernel-entry-point path `context_init` builds. `space` is the child's
/// own address-space handle, installed into the context's root field.
pub fn context_init_fork(
    ctx: &mut Context,
    stack_top: usize,
    frame: super::TrapFrame,
    space: super::AddressSpaceHandle,
) {
    arch_impl::context::context_init_fork(ctx, stack_top, frame, space);
}
