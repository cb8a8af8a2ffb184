//! Kernel heap: a fixed virtual range backed by freshly allocated frames,
//! handed to `linked_list_allocator` as the global allocator.

use linked_list_allocator::LockedHeap;

use crate::hal;
use crate::mm::frame::PMM;
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

const HEAP_START: u64 = 0xFFFF_9000_0000_0000;
const HEAP_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

#[cfg(all(feature = "alloc", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Maps [`HEAP_SIZE`] worth of fresh frames at [`HEAP_START`] in the
/// current (kernel) address space and hands the range to the allocator.
/// Called once from [`crate::mm::init`], after the PMM is up.
pub fn init() {
    let space = crate::mm::vas::AddressSpace::current();
    let pages = HEAP_SIZE / crate::mm::frame::FRAME_SIZE;
    for i in 0..pages {
        let vaddr = VAddr::new(HEAP_START + (i * crate::mm::frame::FRAME_SIZE) as u64);
        let Some(pa) = PMM.alloc_frame() else {
            panic!("mm::heap::init: out of memory reserving kernel heap");
        };
        space
            .map(vaddr, pa, PteFlags::PRESENT | PteFlags::WRITE)
            .expect("mapping a fresh kernel heap page cannot fail");
    }
    #[cfg(all(feature = "alloc", target_os = "none"))]
    {
        // SAFETY: `[HEAP_START, HEAP_START + HEAP_SIZE)` was just mapped
        // to freshly zeroed frames above, and this function runs exactly
        // once, before any other code depends on the allocator.
        unsafe {
            ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
        }
    }
    log::info!("mm: kernel heap ready, {HEAP_SIZE:#x} bytes at {HEAP_START:#x}");
}
