//! Page-fault service: resolves copy-on-write faults, kills the faulting
//! task on a genuine access violation.

use crate::hal;
use crate::mm::frame::{PAddr, PMM};
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

/// Called from every architecture's page-fault trap handler with a
/// uniform signature: faulting address, whether the access was a write,
/// whether it originated in user mode, and the faulting instruction's
/// program counter (used only for diagnostics).
pub fn handle(addr: u64, is_write: bool, is_user: bool, pc: u64) {
    let vaddr = VAddr::new(addr).page_align_down();
    let space = crate::sched::scheduler::current_address_space();

    let Some((pa, flags)) = hal::query(space, vaddr) else {
        if is_user {
            log::warn!("sigsegv: unmapped access at {addr:#x} (pc={pc:#x})");
            crate::sched::scheduler::terminate_current(crate::sched::SIGSEGV);
            return;
        }
        panic!("kernel page fault: unmapped address {addr:#x} at pc={pc:#x}");
    };

    if is_write && flags.contains(PteFlags::COW) {
        resolve_cow(space, vaddr, pa, flags);
        return;
    }

    if is_write && !flags.contains(PteFlags::WRITE) {
        if is_user {
            log::warn!("sigsegv: write to read-only page {addr:#x} (pc={pc:#x})");
            crate::sched::scheduler::terminate_current(crate::sched::SIGSEGV);
            return;
        }
        panic!("kernel page fault: write to read-only page {addr:#x} at pc={pc:#x}");
    }

    // Access flag/permission fault the hardware reported on an otherwise
    // valid, non-COW mapping -- nothing this service can repair.
    if is_user {
        log::warn!("sigsegv: permission fault at {addr:#x} (pc={pc:#x})");
        crate::sched::scheduler::terminate_current(crate::sched::SIGSEGV);
    } else {
        panic!("kernel page fault: permission fault at {addr:#x} at pc={pc:#x}");
    }
}

/// Implements spec.md's COW resolution algorithm: the last sharer
/// reclaims the existing frame in place; anyone else gets a private copy.
fn resolve_cow(space: hal::AddressSpaceHandle, vaddr: VAddr, pa: PAddr, flags: PteFlags) {
    let refcount = PMM.frame_get_refcount(pa);
    if refcount <= 1 {
        let writable = (flags - PteFlags::COW) | PteFlags::WRITE;
        if let Err(e) = hal::map(space, vaddr, pa, writable) {
            panic!("cow: failed to reclaim sole-owner frame at {vaddr:?}: {e}");
        }
        return;
    }

    let Some(new_pa) = PMM.alloc_frame() else {
        log::error!("cow: out of memory copying frame for {vaddr:?}");
        crate::sched::scheduler::terminate_current(crate::sched::SIGKILL);
        return;
    };

    // SAFETY: `pa` is mapped and readable at `vaddr` in the current
    // address space; `new_pa` was just allocated and is exclusively
    // ours. Both are frame-sized and frame-aligned.
    unsafe {
        core::ptr::copy_nonoverlapping(
            pa.to_kernel_virt().as_usize() as *const u8,
            new_pa.to_kernel_virt().as_usize() as *mut u8,
            crate::mm::frame::FRAME_SIZE,
        );
    }

    let writable = (flags - PteFlags::COW) | PteFlags::WRITE;
    if let Err(e) = hal::map(space, vaddr, new_pa, writable) {
        panic!("cow: failed to install private copy at {vaddr:?}: {e}");
    }
    if let Err(e) = PMM.frame_ref_dec(pa) {
        log::error!("cow: refcount decrement failed for {pa:?}: {e:?}");
    }
}
