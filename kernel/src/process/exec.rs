//! `sys_execve` (C6 / spec.md 4.5 "Execve").

use alloc::string::String;
use alloc::sync::Arc;

use crate::elf::{self, PF_W, PF_X};
use crate::error::KResult;
use crate::fs;
use crate::hal::TrapFrame;
use crate::mm::page_table::PteFlags;
use crate::mm::vas::AddressSpace;
use crate::mm::{VAddr, FRAME_SIZE, PMM};
use crate::sched::scheduler;
use crate::sched::task::{HeapState, Task};
use crate::sched::USER_STACK_PAGES;

/// Top of the fixed user-stack region every freshly exec'd image gets,
/// per spec.md 3's address-space layout (just below the canonical-address
/// hole on x86_64; aarch64/i686 reuse the same user-space ceiling since
/// none of them map anything there).
const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;

/// Default heap size reserved (but not mapped) past the highest `PT_LOAD`
/// segment, available to `sys_brk` without a further mapping decision.
const DEFAULT_HEAP_PAGES: u64 = 256;

/// Replaces the calling task's image with the one named by `path`. Builds
/// the entire new address space -- segments mapped, bss zeroed, stack
/// allocated -- before touching the current task's state at all; on any
/// failure (file not found, malformed ELF, out of memory) the caller's
/// image, file descriptors, and register state are untouched (spec.md
/// P10 / scenario 4, "execve of a nonexistent file returns an error and
/// leaves the caller's image in place").
///
/// On success, `frame` is rewritten so the syscall return path resumes
/// directly at the new entry point on the new stack rather than where
/// the `execve` call was made.
pub fn execve(path: &str, frame: &mut TrapFrame) -> KResult<()> {
    let data = fs::read_file(path)?;
    let image = elf::parse(&data)?;

    let space = AddressSpace::new()?;
    let mut highest = VAddr::new(0);
    for seg in &image.segments {
        load_segment(&space, seg)?;
        let seg_end = seg.vaddr.as_u64() + seg.mem_size as u64;
        if seg_end > highest.as_u64() {
            highest = VAddr::new(seg_end);
        }
    }
    let stack_top = build_user_stack(&space)?;

    let heap_start = VAddr::new((highest.as_u64() + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1));
    let heap_max = VAddr::new(heap_start.as_u64() + DEFAULT_HEAP_PAGES * FRAME_SIZE as u64);

    let current = scheduler::current_task();
    // Load the new space into CR3/TTBR0 *before* installing it on the PCB:
    // `set_address_space` swaps the PCB's `Arc<AddressSpace>`, which drops
    // the old one immediately and frees its page-table frames back to the
    // PMM. If the hardware root register still pointed at the old space
    // when that happened, the next privileged return would execute through
    // stale, partially-freed page tables. Switching first means the old
    // space's `Drop` only ever runs once nothing live references its root
    // (spec.md 4.5 step 3: "switch to the new address space, free the old
    // one").
    space.switch_to();
    current.set_address_space(Arc::new(space));
    *current.heap.lock() = HeapState {
        start: heap_start,
        end: heap_start,
        max: heap_max,
    };
    *current.name.lock() = String::from(path);
    ensure_stdio(&current);

    frame.set_exec_return(image.entry.as_u64(), stack_top.as_u64());
    Ok(())
}

/// Maps one `PT_LOAD` segment into `space`: one freshly allocated frame
/// per page the segment covers, the file's bytes copied in and the
/// remainder (`memsz - filesz`, e.g. `.bss`) zeroed, per the ELF
/// loading contract.
fn load_segment(space: &AddressSpace, seg: &elf::Segment<'_>) -> KResult<()> {
    let mut flags = PteFlags::PRESENT | PteFlags::USER;
    if seg.flags & PF_W != 0 {
        flags |= PteFlags::WRITE;
    }
    if seg.flags & PF_X != 0 {
        flags |= PteFlags::EXEC;
    }

    let seg_start = seg.vaddr.page_align_down();
    let in_page_offset = seg.vaddr.offset_in_page() as usize;
    let total = in_page_offset + seg.mem_size;
    let pages = total.div_ceil(FRAME_SIZE);

    for page in 0..pages {
        let frame = PMM.alloc_frame().ok_or(crate::error::KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: PMM.get_info().free * FRAME_SIZE,
        })?;
        let page_vaddr = VAddr::new(seg_start.as_u64() + (page * FRAME_SIZE) as u64);

        // SAFETY: `frame` was just allocated and is exclusively ours
        // until mapped below; `to_kernel_virt` is the same direct-map
        // identity the COW fault service copies through.
        unsafe {
            core::ptr::write_bytes(frame.to_kernel_virt().as_usize() as *mut u8, 0, FRAME_SIZE);
        }

        let page_start_in_seg = page * FRAME_SIZE;
        let page_end_in_seg = page_start_in_seg + FRAME_SIZE;
        let copy_start = page_start_in_seg.max(in_page_offset);
        let copy_end = page_end_in_seg.min(in_page_offset + seg.file_data.len());
        if copy_end > copy_start {
            let file_off = copy_start - in_page_offset;
            let file_len = copy_end - copy_start;
            // SAFETY: `frame` is frame-sized, exclusively ours, and
            // `copy_start - page_start_in_seg` is within bounds by
            // construction.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    seg.file_data.as_ptr().add(file_off),
                    (frame.to_kernel_virt().as_usize() + (copy_start - page_start_in_seg)) as *mut u8,
                    file_len,
                );
            }
        }

        space.map(page_vaddr, frame, flags)?;
    }
    Ok(())
}

/// Allocates and maps the fixed-size user stack every freshly exec'd
/// image starts with, returning its initial top-of-stack pointer.
fn build_user_stack(space: &AddressSpace) -> KResult<VAddr> {
    let stack_bytes = (USER_STACK_PAGES * FRAME_SIZE) as u64;
    let stack_base = USER_STACK_TOP - stack_bytes;
    for page in 0..USER_STACK_PAGES {
        let frame = PMM.alloc_frame().ok_or(crate::error::KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: PMM.get_info().free * FRAME_SIZE,
        })?;
        let vaddr = VAddr::new(stack_base + (page * FRAME_SIZE) as u64);
        // SAFETY: freshly allocated frame, exclusively ours until mapped.
        unsafe {
            core::ptr::write_bytes(frame.to_kernel_virt().as_usize() as *mut u8, 0, FRAME_SIZE);
        }
        space.map(vaddr, frame, PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER)?;
    }
    Ok(VAddr::new(USER_STACK_TOP))
}

/// Wires fds 0/1/2 to `/dev/console` if the task doesn't already have
/// something open there -- `execve` must leave a freshly loaded image
/// with usable standard streams even though this kernel has no shell to
/// set them up beforehand.
fn ensure_stdio(task: &Task) {
    let mut fds = task.fd_table.lock();
    for fd in 0i32..3 {
        if !fds.is_open(fd) {
            if let Ok(console) = fs::open("/dev/console") {
                let _ = fds.install_at(fd, console);
            }
        }
    }
}
