//! i686 2-level paging (classic, non-PAE): a page directory of 1024
//! entries, each either a 4 MiB leaf (PS bit) or pointing at a page table
//! of 1024 4 KiB leaves.

extern crate alloc;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::mm::frame::PAddr;
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

pub const PGTABLE_LEVELS: usize = 2;
pub const ENTRIES_PER_LEVEL: usize = 1024;
/// Non-PAE 32-bit paging has no hardware no-execute bit.
pub const SUPPORTS_NX: bool = false;
pub const SUPPORTS_HUGE_PAGES: bool = true;

const HUGE_BIT: u32 = 1 << 7;

fn encode(pa: PAddr, flags: PteFlags) -> u32 {
    let mut word = (pa.as_u64() & 0xFFFF_F000) as u32;
    if flags.contains(PteFlags::PRESENT) {
        word |= 1 << 0;
    }
    if flags.contains(PteFlags::WRITE) {
        word |= 1 << 1;
    }
    if flags.contains(PteFlags::USER) {
        word |= 1 << 2;
    }
    if flags.contains(PteFlags::NOCACHE) {
        word |= (1 << 3) | (1 << 4);
    }
    if flags.contains(PteFlags::ACCESSED) {
        word |= 1 << 5;
    }
    if flags.contains(PteFlags::DIRTY) {
        word |= 1 << 6;
    }
    if flags.contains(PteFlags::COW) {
        word |= 1 << 9; // software-available bit
    }
    // EXEC has no hardware representation on non-PAE i686; accepted but
    // not independently enforced, as documented on `PteFlags`.
    word
}

fn decode(word: u32) -> (PAddr, PteFlags) {
    let pa = PAddr::new((word & 0xFFFF_F000) as u64);
    let mut flags = PteFlags::EXEC; // always "executable" absent NX
    if word & 1 != 0 {
        flags |= PteFlags::PRESENT;
    }
    if word & (1 << 1) != 0 {
        flags |= PteFlags::WRITE;
    }
    if word & (1 << 2) != 0 {
        flags |= PteFlags::USER;
    }
    if word & ((1 << 3) | (1 << 4)) != 0 {
        flags |= PteFlags::NOCACHE;
    }
    if word & (1 << 5) != 0 {
        flags |= PteFlags::ACCESSED;
    }
    if word & (1 << 6) != 0 {
        flags |= PteFlags::DIRTY;
    }
    if word & (1 << 9) != 0 {
        flags |= PteFlags::COW;
    }
    (pa, flags)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceHandle {
    pub root: PAddr,
}

static KERNEL_ROOT: Mutex<Option<PAddr>> = Mutex::new(None);
static CURRENT: Mutex<Option<AddressSpaceHandle>> = Mutex::new(None);

pub fn init_kernel_space() {
    let cr3 = read_cr3();
    *KERNEL_ROOT.lock() = Some(PAddr::new(cr3 as u64));
    *CURRENT.lock() = Some(AddressSpaceHandle {
        root: PAddr::new(cr3 as u64),
    });
}

fn read_cr3() -> u32 {
    let cr3: u32;
    // SAFETY: reading a control register has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) cr3);
    }
    cr3
}

fn table_slice<'a>(pa: PAddr) -> &'a mut [u32] {
    // SAFETY: `pa` always names a frame this module allocated from the
    // PMM and mapped in the kernel's direct map.
    unsafe {
        core::slice::from_raw_parts_mut(
            pa.to_kernel_virt().as_usize() as *mut u32,
            ENTRIES_PER_LEVEL,
        )
    }
}

fn alloc_table() -> KResult<PAddr> {
    crate::mm::frame::PMM.alloc_frame().ok_or(KernelError::OutOfMemory {
        requested: crate::mm::frame::FRAME_SIZE,
        available: crate::mm::frame::PMM.get_info().free,
    })
}

fn pd_index(vaddr: u64) -> usize {
    ((vaddr >> 22) & 0x3FF) as usize
}

fn pt_index(vaddr: u64) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

fn walk(root: PAddr, vaddr: u64, create: bool) -> KResult<Option<*mut u32>> {
    let pd = table_slice(root);
    let pdi = pd_index(vaddr);
    let pde = pd[pdi];
    let pt = if pde & 1 == 0 {
        if !create {
            return Ok(None);
        }
        let new_table = alloc_table()?;
        pd[pdi] = (new_table.as_u64() as u32) | 0b111;
        new_table
    } else {
        PAddr::new((pde & 0xFFFF_F000) as u64)
    };
    let entries = table_slice(pt);
    // SAFETY: pointer into a live, kernel-mapped page-table frame.
    Ok(Some(unsafe { entries.as_mut_ptr().add(pt_index(vaddr)) }))
}

pub fn create_space() -> KResult<AddressSpaceHandle> {
    let root = alloc_table()?;
    let kernel_root = (*KERNEL_ROOT.lock()).expect("kernel space not initialized");
    let kernel_entries = table_slice(kernel_root);
    let new_entries = table_slice(root);
    // Upper 256 MiB-granularity directory entries (768..1024, the
    // classic 3 GiB/1 GiB split) are shared kernel mappings.
    new_entries[768..1024].copy_from_slice(&kernel_entries[768..1024]);
    Ok(AddressSpaceHandle { root })
}

pub fn destroy_space(space: AddressSpaceHandle) {
    let entries: alloc::vec::Vec<u32> = table_slice(space.root)[..768].to_vec();
    for pde in entries {
        if pde & 1 == 0 {
            continue;
        }
        let pt = PAddr::new((pde & 0xFFFF_F000) as u64);
        for pte in table_slice(pt).iter().copied() {
            if pte & 1 != 0 {
                let _ = crate::mm::frame::PMM.free_frame(PAddr::new((pte & 0xFFFF_F000) as u64));
            }
        }
        let _ = crate::mm::frame::PMM.free_frame(pt);
    }
    let _ = crate::mm::frame::PMM.free_frame(space.root);
}

pub fn map(space: AddressSpaceHandle, vaddr: VAddr, paddr: PAddr, flags: PteFlags) -> KResult<()> {
    if !vaddr.is_page_aligned() || !paddr.is_frame_aligned() {
        return Err(KernelError::Unaligned {
            addr: vaddr.as_usize(),
            align: crate::mm::frame::FRAME_SIZE,
        });
    }
    let entry_ptr = walk(space.root, vaddr.as_u64(), true)?.expect("walk(create=true) always yields an entry");
    // SAFETY: entry_ptr from `walk` is a valid PTE slot.
    unsafe {
        *entry_ptr = encode(paddr, flags | PteFlags::PRESENT);
    }
    flush_tlb(vaddr);
    Ok(())
}

pub fn unmap(space: AddressSpaceHandle, vaddr: VAddr) -> KResult<PAddr> {
    let entry_ptr = match walk(space.root, vaddr.as_u64(), false)? {
        Some(p) => p,
        None => return Err(KernelError::Unmapped { addr: vaddr.as_usize() }),
    };
    // SAFETY: see `walk`.
    let word = unsafe { *entry_ptr };
    if word & 1 == 0 {
        return Err(KernelError::Unmapped { addr: vaddr.as_usize() });
    }
    let (pa, _) = decode(word);
    // SAFETY: see above.
    unsafe {
        *entry_ptr = 0;
    }
    flush_tlb(vaddr);
    Ok(pa)
}

pub fn query(space: AddressSpaceHandle, vaddr: VAddr) -> Option<(PAddr, PteFlags)> {
    let entry_ptr = walk(space.root, vaddr.as_u64(), false).ok()??;
    // SAFETY: see `walk`.
    let word = unsafe { *entry_ptr };
    if word & 1 == 0 {
        return None;
    }
    Some(decode(word))
}

pub fn for_each_user_leaf(space: AddressSpaceHandle, mut callback: impl FnMut(VAddr, PAddr, PteFlags)) {
    let pd: alloc::vec::Vec<u32> = table_slice(space.root)[..768].to_vec();
    for (pdi, pde) in pd.iter().enumerate() {
        if pde & 1 == 0 {
            continue;
        }
        if pde & HUGE_BIT != 0 {
            let (pa, flags) = decode(*pde);
            callback(VAddr::new(((pdi as u64) << 22) as u64), pa, flags);
            continue;
        }
        let pt = PAddr::new((pde & 0xFFFF_F000) as u64);
        let pt_entries: alloc::vec::Vec<u32> = table_slice(pt).to_vec();
        for (pti, pte) in pt_entries.iter().enumerate() {
            if pte & 1 == 0 {
                continue;
            }
            let vaddr = ((pdi as u64) << 22) | ((pti as u64) << 12);
            let (pa, flags) = decode(*pte);
            callback(VAddr::new(vaddr), pa, flags);
        }
    }
}

pub fn flush_tlb(vaddr: VAddr) {
    // SAFETY: invlpg on an address this task owns is always sound.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) vaddr.as_u64() as u32, options(nostack, preserves_flags));
    }
}

pub fn flush_tlb_all() {
    let cr3 = read_cr3();
    // SAFETY: reloading CR3 flushes all non-global TLB entries.
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) cr3);
    }
}

pub fn switch_space(space: AddressSpaceHandle) {
    let current = read_cr3();
    if current as u64 != space.root.as_u64() {
        // SAFETY: `space.root` names a page directory built by
        // `create_space` or the boot-time template.
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) space.root.as_u64() as u32);
        }
    }
    *CURRENT.lock() = Some(space);
}

pub fn current_space() -> AddressSpaceHandle {
    match *CURRENT.lock() {
        Some(space) => space,
        None => AddressSpaceHandle {
            root: PAddr::new(read_cr3() as u64),
        },
    }
}
