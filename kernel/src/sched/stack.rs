//! Kernel-stack allocation for fresh tasks.
//!
//! Kernel stacks live in the shared upper half, so once mapped through
//! any address space they are visible from every address space -- this
//! is the same reasoning `mm::heap` relies on for the kernel heap.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::KResult;
use crate::mm::page_table::PteFlags;
use crate::mm::{VAddr, FRAME_SIZE, PMM};

use super::scheduler::kernel_address_space;
use super::KERNEL_STACK_PAGES;


/// Base of the kernel-stack region, chosen well clear of [`crate::mm::heap`]'s
/// `HEAP_START..HEAP_START+HEAP_SIZE` range.
const KSTACK_REGION_BASE: u64 = 0xFFFF_9100_0000_0000;

static NEXT_STACK: AtomicU64 = AtomicU64::new(KSTACK_REGION_BASE);

/// Allocate and map a fresh kernel stack, returning its top (the address
/// `context_init`/`context_init_fork` should seed as `stack_top`). Each
/// stack is followed by one unmapped guard page so a stack overflow faults
/// instead of silently corrupting the next task's stack.
pub fn alloc_kernel_stack() -> KResult<usize> {
    let stack_bytes = (KERNEL_STACK_PAGES * FRAME_SIZE) as u64;
    let guarded_bytes = stack_bytes + FRAME_SIZE as u64;
    let base = NEXT_STACK.fetch_add(guarded_bytes, Ordering::Relaxed);

    let space = kernel_address_space();
    for page in 0..KERNEL_STACK_PAGES {
        let Some(frame) = PMM.alloc_frame() else {
            return Err(crate::error::KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: PMM.get_info().free * FRAME_SIZE,
            });
        };
        let vaddr = VAddr::new(base + (page * FRAME_SIZE) as u64);
        space.map(vaddr, frame, PteFlags::PRESENT | PteFlags::WRITE)?;
    }
    Ok((base + stack_bytes) as usize)
}
