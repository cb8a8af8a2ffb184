//! AArch64 4-level (4 KiB granule) translation tables.
//!
//! Descriptor layout (simplified to what this kernel actually uses):
//! ```text
//! bit 0      valid
//! bit 1      table (non-leaf) / page (leaf at level 3)
//! bits 3:2   AttrIndx (0 = normal, 1 = device -- see MAIR_EL1 setup)
//! bits 7:6   AP[2:1]: 00 EL1-only RW, 01 EL1+EL0 RW, 10 EL1-only RO, 11 EL1+EL0 RO
//! bit 10     AF (access flag, must be set or the first access faults)
//! bit 55     software: copy-on-write
//! bit 53     PXN
//! bit 54     UXN
//! ```

extern crate alloc;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::mm::frame::PAddr;
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

pub const PGTABLE_LEVELS: usize = 4;
pub const ENTRIES_PER_LEVEL: usize = 512;
pub const SUPPORTS_NX: bool = true;
pub const SUPPORTS_HUGE_PAGES: bool = true;

const AF_BIT: u64 = 1 << 10;
const COW_BIT: u64 = 1 << 55;
const PXN_BIT: u64 = 1 << 53;
const UXN_BIT: u64 = 1 << 54;
const AP_SHIFT: u64 = 6;
const ATTR_DEVICE: u64 = 1 << 2;

fn encode(pa: PAddr, flags: PteFlags, leaf: bool) -> u64 {
    let mut word = pa.as_u64() & 0x000F_FFFF_FFFF_F000;
    word |= if leaf { 0b11 } else { 0b11 }; // valid + table/page (both use bit1=1)
    if flags.contains(PteFlags::NOCACHE) {
        word |= ATTR_DEVICE;
    }
    let ap = match (flags.contains(PteFlags::USER), flags.contains(PteFlags::WRITE)) {
        (false, true) => 0b00,
        (true, true) => 0b01,
        (false, false) => 0b10,
        (true, false) => 0b11,
    };
    word |= ap << AP_SHIFT;
    if flags.contains(PteFlags::ACCESSED) || flags.contains(PteFlags::PRESENT) {
        word |= AF_BIT;
    }
    if flags.contains(PteFlags::COW) {
        word |= COW_BIT;
    }
    if !flags.contains(PteFlags::EXEC) {
        word |= UXN_BIT | PXN_BIT;
    }
    word
}

fn decode(word: u64) -> (PAddr, PteFlags) {
    let pa = PAddr::new(word & 0x000F_FFFF_FFFF_F000);
    let mut flags = PteFlags::empty();
    if word & 1 != 0 {
        flags |= PteFlags::PRESENT;
    }
    let ap = (word >> AP_SHIFT) & 0b11;
    if ap == 0b00 || ap == 0b01 {
        flags |= PteFlags::WRITE;
    }
    if ap == 0b01 || ap == 0b11 {
        flags |= PteFlags::USER;
    }
    if word & ATTR_DEVICE != 0 {
        flags |= PteFlags::NOCACHE;
    }
    if word & AF_BIT != 0 {
        flags |= PteFlags::ACCESSED;
    }
    if word & COW_BIT != 0 {
        flags |= PteFlags::COW;
    }
    if word & UXN_BIT == 0 {
        flags |= PteFlags::EXEC;
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
    let root = read_ttbr1();
    *KERNEL_ROOT.lock() = Some(PAddr::new(root));
    *CURRENT.lock() = Some(AddressSpaceHandle {
        root: PAddr::new(read_ttbr0()),
    });
}

fn read_ttbr0() -> u64 {
    use cortex_a::registers::TTBR0_EL1;
    use tock_registers::interfaces::Readable;
    TTBR0_EL1.get()
}

fn read_ttbr1() -> u64 {
    use cortex_a::registers::TTBR1_EL1;
    use tock_registers::interfaces::Readable;
    TTBR1_EL1.get()
}

fn table_slice<'a>(pa: PAddr) -> &'a mut [u64] {
    // SAFETY: `pa` always names a frame this module allocated from the
    // PMM and mapped in the kernel's direct map.
    unsafe { core::slice::from_raw_parts_mut(pa.to_kernel_virt().as_usize() as *mut u64, ENTRIES_PER_LEVEL) }
}

fn alloc_table() -> KResult<PAddr> {
    crate::mm::frame::PMM.alloc_frame().ok_or(KernelError::OutOfMemory {
        requested: crate::mm::frame::FRAME_SIZE,
        available: crate::mm::frame::PMM.get_info().free,
    })
}

fn index_for_level(vaddr: u64, level: usize) -> usize {
    ((vaddr >> (12 + 9 * level)) & 0x1FF) as usize
}

fn walk(root: PAddr, vaddr: u64, create: bool) -> KResult<Option<*mut u64>> {
    let mut table = root;
    for level in (1..PGTABLE_LEVELS).rev() {
        let idx = index_for_level(vaddr, level);
        let entries = table_slice(table);
        let entry = entries[idx];
        if entry & 1 == 0 {
            if !create {
                return Ok(None);
            }
            let new_table = alloc_table()?;
            entries[idx] = encode(new_table, PteFlags::PRESENT, false);
            table = new_table;
        } else {
            table = PAddr::new(entry & 0x000F_FFFF_FFFF_F000);
        }
    }
    let idx = index_for_level(vaddr, 0);
    let entries = table_slice(table);
    // SAFETY: pointer into a live, kernel-mapped page-table frame.
    Ok(Some(unsafe { entries.as_mut_ptr().add(idx) }))
}

pub fn create_space() -> KResult<AddressSpaceHandle> {
    // TTBR0 covers the user half on AArch64's split address space, so a
    // fresh user root starts entirely empty -- the kernel half lives in
    // TTBR1 and needs no copying.
    let root = alloc_table()?;
    let _ = (*KERNEL_ROOT.lock()).expect("kernel space not initialized");
    Ok(AddressSpaceHandle { root })
}

pub fn destroy_space(space: AddressSpaceHandle) {
    free_subtree(space.root, PGTABLE_LEVELS - 1);
    let _ = crate::mm::frame::PMM.free_frame(space.root);
}

fn free_subtree(table: PAddr, level: usize) {
    let entries: alloc::vec::Vec<u64> = table_slice(table).to_vec();
    for entry in entries {
        if entry & 1 == 0 {
            continue;
        }
        let child = PAddr::new(entry & 0x000F_FFFF_FFFF_F000);
        if level > 0 {
            free_subtree(child, level - 1);
        }
        let _ = crate::mm::frame::PMM.free_frame(child);
    }
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
        *entry_ptr = encode(paddr, flags | PteFlags::PRESENT, true);
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
    walk_leaves(space.root, PGTABLE_LEVELS - 1, 0, &mut callback);
}

fn walk_leaves(table: PAddr, level: usize, vaddr_base: u64, callback: &mut impl FnMut(VAddr, PAddr, PteFlags)) {
    let entries: alloc::vec::Vec<u64> = table_slice(table).to_vec();
    for (idx, entry) in entries.iter().enumerate() {
        if entry & 1 == 0 {
            continue;
        }
        let shift = 12 + 9 * level;
        let vaddr = vaddr_base | ((idx as u64) << shift);
        let child = PAddr::new(entry & 0x000F_FFFF_FFFF_F000);
        if level > 0 {
            walk_leaves(child, level - 1, vaddr, callback);
        } else {
            let (pa, flags) = decode(*entry);
            callback(VAddr::new(vaddr), pa, flags);
        }
    }
}

pub fn flush_tlb(vaddr: VAddr) {
    // SAFETY: invalidating this task's own translation for an address it
    // owns is always sound.
    unsafe {
        core::arch::asm!(
            "dsb ishst",
            "tlbi vaae1is, {}",
            "dsb ish",
            "isb",
            in(reg) vaddr.as_u64() >> 12,
        );
    }
}

pub fn flush_tlb_all() {
    // SAFETY: full-ASID TLB invalidation is always sound from kernel
    // context.
    unsafe {
        core::arch::asm!("dsb ishst", "tlbi vmalle1is", "dsb ish", "isb");
    }
}

pub fn switch_space(space: AddressSpaceHandle) {
    if read_ttbr0() != space.root.as_u64() {
        // SAFETY: `space.root` names a translation table root built by
        // `create_space`.
        unsafe {
            use cortex_a::registers::TTBR0_EL1;
            use tock_registers::interfaces::Writeable;
            TTBR0_EL1.set(space.root.as_u64());
            core::arch::asm!("tlbi vmalle1", "dsb sy", "isb");
        }
    }
    *CURRENT.lock() = Some(space);
}

pub fn current_space() -> AddressSpaceHandle {
    match *CURRENT.lock() {
        Some(space) => space,
        None => AddressSpaceHandle {
            root: PAddr::new(read_ttbr0()),
        },
    }
}
