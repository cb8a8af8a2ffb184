//! Memory-domain syscalls (`0x02xx`): `brk`/`mmap` as thin wrappers over
//! the paging core, per SPEC_FULL.md §11 (`brk` moves the PCB's tracked
//! heap break; `mmap` is anonymous-only, no file-backed mappings).

use crate::error::KResult;
use crate::mm::page_table::PteFlags;
use crate::mm::{VAddr, FRAME_SIZE, PMM};
use crate::sched::scheduler;

/// `brk(new_end)`: `new_end == 0` queries the current break without
/// moving it; otherwise the heap is grown or shrunk to `new_end`,
/// mapping/unmapping whole pages as it crosses them. Returns the
/// resulting break, POSIX `brk(2)`-style (not an error code on success).
pub fn sys_brk(new_end: u64) -> KResult<isize> {
    let task = scheduler::current_task();
    let space = task.address_space();
    let mut heap = task.heap.lock();

    if new_end == 0 {
        return Ok(heap.end.as_u64() as isize);
    }
    let requested = VAddr::new(new_end);
    if requested.as_u64() > heap.max.as_u64() {
        return Err(crate::error::KernelError::ResourceExhausted { resource: "heap" });
    }

    let old_top = heap.end.page_align_down().as_u64()
        + if heap.end.offset_in_page() > 0 { FRAME_SIZE as u64 } else { 0 };
    let new_top = requested.page_align_down().as_u64()
        + if requested.offset_in_page() > 0 { FRAME_SIZE as u64 } else { 0 };

    if new_top > old_top {
        let mut page = old_top;
        while page < new_top {
            let frame = PMM.alloc_frame().ok_or(crate::error::KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: PMM.get_info().free * FRAME_SIZE,
            })?;
            space.map(VAddr::new(page), frame, PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER)?;
            page += FRAME_SIZE as u64;
        }
    } else if new_top < old_top {
        let mut page = new_top;
        while page < old_top {
            if let Ok(pa) = space.unmap(VAddr::new(page)) {
                let _ = PMM.free_frame(pa);
            }
            page += FRAME_SIZE as u64;
        }
    }

    heap.end = requested;
    Ok(heap.end.as_u64() as isize)
}

/// `mmap(hint, len, prot)`: anonymous, private, fixed-size only -- no
/// file-backed mapping (that needs the VFS read path, out of scope per
/// spec.md's Non-goals). Returns the mapped base address.
pub fn sys_mmap(hint: u64, len: u64, prot: u64) -> KResult<isize> {
    let task = scheduler::current_task();
    let space = task.address_space();

    let mut flags = PteFlags::PRESENT | PteFlags::USER;
    if prot & 0x2 != 0 {
        flags |= PteFlags::WRITE;
    }
    if prot & 0x4 != 0 {
        flags |= PteFlags::EXEC;
    }

    let base = VAddr::new(hint).page_align_down();
    let pages = (len as usize).div_ceil(FRAME_SIZE).max(1);
    for i in 0..pages {
        let frame = PMM.alloc_frame().ok_or(crate::error::KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: PMM.get_info().free * FRAME_SIZE,
        })?;
        // SAFETY: freshly allocated frame, exclusively ours until mapped.
        unsafe {
            core::ptr::write_bytes(frame.to_kernel_virt().as_usize() as *mut u8, 0, FRAME_SIZE);
        }
        space.map(VAddr::new(base.as_u64() + (i * FRAME_SIZE) as u64), frame, flags)?;
    }
    Ok(base.as_u64() as isize)
}
