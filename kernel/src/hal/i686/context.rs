//! i686 context switch (C4): 32-bit callee-saved registers, `iret` for the
//! ring3 return path.

use core::arch::asm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
    pub cr3: u32,
    pub privilege: Privilege,
    pub user_esp: u32,
}

impl Context {
    pub const fn empty() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            esp: 0,
            eip: 0,
            eflags: 0x202,
            cr3: 0,
            privilege: Privilege::Kernel,
            user_esp: 0,
        }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn kernel_thread_trampoline() -> ! {
    core::arch::naked_asm!(
        "sti",
        "pop eax",
        "call eax",
        "push 0",
        "call {task_exit}",
        "2: hlt",
        "jmp 2b",
        task_exit = sym crate::sched::task_exit_trampoline,
    )
}

pub fn context_init(ctx: &mut Context, entry: usize, stack_top: usize, is_user: bool) {
    if is_user {
        ctx.privilege = Privilege::User;
        ctx.eip = entry as u32;
        ctx.user_esp = stack_top as u32;
        ctx.eflags = 0x202;
    } else {
        ctx.privilege = Privilege::Kernel;
        let sp = (stack_top - core::mem::size_of::<u32>()) as u32;
        // SAFETY: one word below a freshly allocated kernel stack's top,
        // owned exclusively by this task.
        unsafe {
            core::ptr::write(sp as *mut u32, entry as u32);
        }
        ctx.esp = sp;
        ctx.eip = kernel_thread_trampoline as usize as u32;
        ctx.eflags = 0x002;
    }
    // SAFETY: reading CR3 observes current state only.
    ctx.cr3 = unsafe {
        let cr3: u32;
        asm!("mov {}, cr3", out(reg) cr3);
        cr3
    };
}

/// # Safety
/// Caller must hold interrupts disabled; both contexts must be valid.
pub unsafe fn context_switch(old: Option<&mut Context>, new: &Context) {
    if let Some(old) = old {
        // SAFETY: reading live register state is always valid.
        unsafe {
            asm!("mov {}, esp", out(reg) old.esp);
            asm!("pushfd; pop {}", out(reg) old.eflags);
            let cr3: u32;
            asm!("mov {}, cr3", out(reg) cr3);
            old.cr3 = cr3;
        }
        old.eip = return_here as usize as u32;
    }

    // SAFETY: `new.cr3` names a page-directory installed by mm::vas.
    unsafe {
        let current: u32;
        asm!("mov {}, cr3", out(reg) current);
        if current != new.cr3 {
            asm!("mov cr3, {}", in(reg) new.cr3);
        }
    }

    match new.privilege {
        Privilege::Kernel => {
            // SAFETY: `new.esp`/`new.eip` were seeded by `context_init` or
            // captured by a prior switch of this same context.
            unsafe {
                asm!(
                    "mov esp, {sp}",
                    "push {flags}",
                    "popfd",
                    "jmp {pc}",
                    sp = in(reg) new.esp,
                    flags = in(reg) new.eflags,
                    pc = in(reg) new.eip,
                    options(noreturn)
                );
            }
        }
        Privilege::User => {
            // SAFETY: canonical 32-bit iret privilege-change frame: SS,
            // ESP, EFLAGS, CS, EIP, ring-3 selectors per this kernel's GDT.
            unsafe {
                asm!(
                    "push {ss}",
                    "push {usp}",
                    "push {flags}",
                    "push {cs}",
                    "push {pc}",
                    "iretd",
                    ss = in(reg) 0x23u32,
                    usp = in(reg) new.user_esp,
                    flags = in(reg) new.eflags | 0x200,
                    cs = in(reg) 0x1Bu32,
                    pc = in(reg) new.eip,
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
    crate::hal::i686::irq::set_tss_esp0(top as u32);
}

use crate::hal::i686::mmu::AddressSpaceHandle;
use crate::hal::i686::syscall_entry::TrapFrame;

/// See the x86_64 counterpart: seeds a context that resumes a forked
/// child straight into user mode from a copy of the parent's trap frame.
pub fn context_init_fork(
    ctx: &mut Context,
    stack_top: usize,
    frame: TrapFrame,
    space: AddressSpaceHandle,
) {
    ctx.cr3 = space.root.as_u64() as u32;
    let frame_size = core::mem::size_of::<TrapFrame>();
    let frame_addr = stack_top - frame_size;
    // SAFETY: within the child's freshly allocated, exclusively owned
    // kernel stack.
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, frame);
    }
    let ptr_slot = frame_addr - core::mem::size_of::<u32>();
    // SAFETY: see above.
    unsafe {
        core::ptr::write(ptr_slot as *mut u32, frame_addr as u32);
    }
    ctx.esp = ptr_slot as u32;
    ctx.eip = fork_child_trampoline as usize as u32;
    ctx.eflags = 0x002;
    ctx.privilege = Privilege::Kernel;
}

#[unsafe(naked)]
unsafe extern "C" fn fork_child_trampoline() -> ! {
    core::arch::naked_asm!(
        "pop ecx",               // &TrapFrame, seeded by context_init_fork
        "push 0x23",             // ss
        "push dword ptr [ecx + 32]", // user_esp
        "push dword ptr [ecx + 28]", // user_eflags
        "push 0x1B",             // cs
        "push dword ptr [ecx + 24]", // user_eip
        "mov edi, [ecx + 0]",
        "mov esi, [ecx + 4]",
        "mov edx, [ecx + 8]",
        "mov ebx, [ecx + 16]",
        "mov eax, [ecx + 20]",
        "mov ecx, [ecx + 12]",   // overwrite ecx last, it held the pointer
        "iretd",
    )
}
