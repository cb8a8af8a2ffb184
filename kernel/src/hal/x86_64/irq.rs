//! x86_64 GDT/TSS/IDT/PIC bring-up.
//!
//! Interrupts are this kernel's sole concurrency source on the core path
//! (spec.md §5); this module only has to get trap dispatch working, not
//! provide SMP-safe structures.

use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::instructions::segmentation::{Segment, CS, DS, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::registers::control::Cr2;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

const DOUBLE_FAULT_IST_INDEX: u16 = 0;
const KERNEL_STACK_SIZE: usize = 4096 * 5;

static mut DOUBLE_FAULT_STACK: [u8; KERNEL_STACK_SIZE] = [0; KERNEL_STACK_SIZE];

lazy_static! {
    static ref TSS: Mutex<TaskStateSegment> = Mutex::new({
        let mut tss = TaskStateSegment::new();
        // SAFETY: DOUBLE_FAULT_STACK is a private static backing array used
        // only as IST storage; taking its address does not alias any other
        // reference.
        let stack_start = VirtAddr::from_ptr(unsafe { core::ptr::addr_of!(DOUBLE_FAULT_STACK) });
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            stack_start + KERNEL_STACK_SIZE as u64;
        tss
    });
}

struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_code: SegmentSelector,
    user_data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        // SAFETY: `TSS` is 'static and initialized above before this
        // descriptor is built; `load_tss` below installs the matching
        // selector before it is ever used for a privilege-level switch.
        let tss = gdt.append(Descriptor::tss_segment(unsafe {
            &*(&*TSS.lock() as *const TaskStateSegment)
        }));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
                tss,
            },
        )
    };
}

pub fn init_gdt() {
    GDT.0.load();
    // SAFETY: the selectors above come from the GDT just loaded; CS/SS/DS
    // must be reloaded immediately after an `lgdt` for the CPU to use the
    // new descriptors.
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        SS::set_reg(GDT.1.kernel_data);
        load_tss(GDT.1.tss);
    }
    let _ = (GDT.1.user_code, GDT.1.user_data);
}

/// RSP0 in the TSS: the stack the CPU loads on a ring3->ring0 trap. Set on
/// every context switch so the next trap lands on the incoming task's
/// kernel stack.
pub fn set_tss_rsp0(top: u64) {
    TSS.lock().privilege_stack_table[0] = VirtAddr::new(top);
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.page_fault.set_handler_fn(page_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(DOUBLE_FAULT_IST_INDEX);
        }
        idt[InterruptIndex::Timer as u8].set_handler_fn(timer_interrupt_handler);
        idt[0x80].set_handler_fn(legacy_syscall_handler);
        idt
    };
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum InterruptIndex {
    Timer = 32,
}

pub fn init_idt() {
    IDT.load();
}

/// Disables interrupts and reports whether they had been enabled, so the
/// caller can restore the prior state rather than unconditionally
/// re-enabling.
pub fn disable() -> bool {
    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    was_enabled
}

pub fn enable() {
    x86_64::instructions::interrupts::enable();
}

pub fn init_pic() {
    const PIC_1_OFFSET: u8 = 32;
    const PIC_2_OFFSET: u8 = 40;
    // SAFETY: the 8259 PIC pair is owned exclusively by the kernel at
    // this point in boot; remapping it to avoid colliding with CPU
    // exception vectors 0-31 is the standard sequence.
    let mut pics = unsafe { pic8259::ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) };
    // SAFETY: called exactly once during `interrupt_init`.
    unsafe { pics.initialize() };
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let addr = Cr2::read().expect("invalid CR2 on page fault").as_u64();
    let is_write = error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let is_user = error_code.contains(PageFaultErrorCode::USER_MODE);
    crate::mm::page_fault::handle(addr, is_write, is_user, frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn double_fault_handler(
    frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("double fault: {frame:#?}");
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    crate::sched::scheduler::on_timer_tick();
    // SAFETY: EOI is always safe to issue from a PIC-vectored handler.
    unsafe {
        let mut port: x86_64::instructions::port::Port<u8> =
            x86_64::instructions::port::Port::new(0x20);
        port.write(0x20u8);
    }
}

extern "x86-interrupt" fn legacy_syscall_handler(_frame: InterruptStackFrame) {
    // Real argument marshalling happens in the `syscall`/`sysret` fast
    // path (syscall_entry.rs); `int 0x80` is kept only for parity with
    // the i686 calling convention described in spec.md §4.6.
}
