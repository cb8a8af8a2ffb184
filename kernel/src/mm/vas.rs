//! Address-space abstraction with copy-on-write fork cloning (C3).

use crate::error::KResult;
use crate::hal;
use crate::mm::frame::{PAddr, PMM};
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

pub use hal::AddressSpaceHandle;

/// Owns a page-table root for the lifetime of a process. Dropping it
/// frees every frame the address space still references (decrementing
/// shared COW frames rather than double-freeing them, since
/// `hal::destroy_space` walks leaves and calls `PMM::free_frame`, which
/// already respects refcounts).
pub struct AddressSpace {
    handle: AddressSpaceHandle,
    owns_root: bool,
}

impl AddressSpace {
    pub fn new() -> KResult<Self> {
        Ok(Self {
            handle: hal::create_space()?,
            owns_root: true,
        })
    }

    /// Wraps the space the kernel/bootstrap task already runs in, without
    /// taking ownership of its root -- dropping this handle must not tear
    /// down the kernel's own page tables.
    pub fn current() -> Self {
        Self {
            handle: hal::current_space(),
            owns_root: false,
        }
    }

    pub fn handle(&self) -> AddressSpaceHandle {
        self.handle
    }

    pub fn map(&self, vaddr: VAddr, paddr: PAddr, flags: PteFlags) -> KResult<()> {
        hal::map(self.handle, vaddr, paddr, flags)
    }

    pub fn unmap(&self, vaddr: VAddr) -> KResult<PAddr> {
        hal::unmap(self.handle, vaddr)
    }

    pub fn query(&self, vaddr: VAddr) -> Option<(PAddr, PteFlags)> {
        hal::query(self.handle, vaddr)
    }

    pub fn switch_to(&self) {
        hal::switch_space(self.handle);
    }

    /// Clones every present user leaf into a fresh child address space.
    /// Writable leaves are downgraded to read-only+COW in *both* the
    /// parent and the child and the frame's refcount is incremented;
    /// already-COW or read-only leaves are simply shared. This is the
    /// entirety of `fork`'s page-table work (spec.md C3, fork semantics).
    pub fn clone_for_fork(&self) -> KResult<AddressSpace> {
        let child = AddressSpace::new()?;
        let mut first_error = None;
        hal::for_each_user_leaf(self.handle, |vaddr, pa, flags| {
            if first_error.is_some() {
                return;
            }
            let shared_flags = if flags.contains(PteFlags::WRITE) {
                let downgraded = (flags - PteFlags::WRITE) | PteFlags::COW;
                if let Err(e) = hal::map(self.handle, vaddr, pa, downgraded) {
                    first_error = Some(e);
                    return;
                }
                downgraded
            } else {
                flags
            };
            if let Err(e) = PMM.frame_ref_inc(pa) {
                first_error = Some(e.into());
                return;
            }
            if let Err(e) = hal::map(child.handle, vaddr, pa, shared_flags) {
                first_error = Some(e);
            }
        });
        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(child)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if self.owns_root {
            hal::destroy_space(self.handle);
        }
    }
}
