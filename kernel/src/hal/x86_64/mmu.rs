//! x86_64 4-level paging (C3's per-architecture half).
//!
//! Hardware PTE layout:
//! ```text
//! bit 0   present
//! bit 1   writable
//! bit 2   user
//! bit 3   write-through
//! bit 4   cache-disable
//! bit 5   accessed
//! bit 6   dirty
//! bit 7   huge (PD/PDPT only)
//! bit 9   software: copy-on-write
//! bit 63  no-execute
//! ```

extern crate alloc;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::mm::frame::{PAddr, Zone, PMM};
use crate::mm::page_table::PteFlags;
use crate::mm::VAddr;

pub const PGTABLE_LEVELS: usize = 4;
pub const ENTRIES_PER_LEVEL: usize = 512;
pub const SUPPORTS_NX: bool = true;
pub const SUPPORTS_HUGE_PAGES: bool = true;

const NX_BIT: u64 = 1 << 63;
const COW_BIT: u64 = 1 << 9;
const HUGE_BIT: u64 = 1 << 7;

/// Encode a logical [`PteFlags`] set into the x86_64 hardware bit layout.
/// Present, writable and user bits map directly; `NOCACHE` sets both PWT
/// and PCD; `EXEC` is inverted into the NX bit; `COW` lives in a software
/// bit (9) that hardware ignores.
fn encode(pa: PAddr, flags: PteFlags) -> u64 {
    let mut word = pa.as_u64() & 0x000F_FFFF_FFFF_F000;
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
        word |= COW_BIT;
    }
    if !flags.contains(PteFlags::EXEC) {
        word |= NX_BIT;
    }
    word
}

fn decode(word: u64) -> (PAddr, PteFlags) {
    let pa = PAddr::new(word & 0x000F_FFFF_FFFF_F000);
    let mut flags = PteFlags::empty();
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
    if word & COW_BIT != 0 {
        flags |= PteFlags::COW;
    }
    if word & NX_BIT == 0 {
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

/// Records the page-table root the bootloader handed us as the template
/// every new address space's upper (kernel) half is cloned from.
pub fn init_kernel_space() {
    let cr3 = read_cr3();
    *KERNEL_ROOT.lock() = Some(PAddr::new(cr3));
    *CURRENT.lock() = Some(AddressSpaceHandle {
        root: PAddr::new(cr3),
    });
}

fn read_cr3() -> u64 {
    let cr3: u64;
    // SAFETY: reading a control register has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) cr3);
    }
    cr3
}

fn table_virt(pa: PAddr) -> *mut u64 {
    pa.to_kernel_virt().as_usize() as *mut u64
}

fn table_slice<'a>(pa: PAddr) -> &'a mut [u64] {
    // SAFETY: `pa` always names a frame allocated by this module from the
    // PMM and mapped in the kernel's direct map; callers hold the
    // implicit single-threaded-on-the-core-path invariant from
    // `hal::with_irq_disabled`.
    unsafe { core::slice::from_raw_parts_mut(table_virt(pa), ENTRIES_PER_LEVEL) }
}

fn alloc_table() -> KResult<PAddr> {
    PMM.alloc_frame().ok_or(KernelError::OutOfMemory {
        requested: crate::mm::frame::FRAME_SIZE,
        available: PMM.get_info().free,
    })
}

fn index_for_level(vaddr: u64, level: usize) -> usize {
    // level 3 = PML4, 2 = PDPT, 1 = PD, 0 = PT
    ((vaddr >> (12 + 9 * level)) & 0x1FF) as usize
}

/// Walk from `root` down to the PT (level 0) entry for `vaddr`, allocating
/// any missing intermediate table when `create` is set. Intermediate
/// entries are always marked present+writable+user; access control is
/// enforced only at the leaf.
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
            entries[idx] = new_table.as_u64() | 0b111; // present, writable, user
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
    let root = alloc_table()?;
    let kernel_root = (*KERNEL_ROOT.lock()).expect("kernel space not initialized");
    let kernel_entries = table_slice(kernel_root);
    let new_entries = table_slice(root);
    // Share the upper half (indices 256..512, canonical higher half) with
    // every address space so kernel code/data stay mapped identically
    // everywhere.
    new_entries[256..512].copy_from_slice(&kernel_entries[256..512]);
    Ok(AddressSpaceHandle { root })
}

pub fn destroy_space(space: AddressSpaceHandle) {
    free_subtree(space.root, PGTABLE_LEVELS - 1, 0, true);
    let _ = PMM.free_frame(space.root);
}

/// Recursively frees user-half (lower 256 entries at the top level) page
/// tables and leaf frames. `is_top` restricts the first level's range to
/// avoid touching the shared kernel half.
fn free_subtree(table: PAddr, level: usize, _vaddr_base: u64, is_top: bool) {
    let range_end = if is_top { 256 } else { ENTRIES_PER_LEVEL };
    let entries: alloc::vec::Vec<u64> = table_slice(table)[..range_end].to_vec();
    for entry in entries {
        if entry & 1 == 0 {
            continue;
        }
        let child = PAddr::new(entry & 0x000F_FFFF_FFFF_F000);
        if level > 0 {
            free_subtree(child, level - 1, 0, false);
            let _ = PMM.free_frame(child);
        } else {
            let _ = PMM.free_frame(child);
        }
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
    // SAFETY: `entry_ptr` points at a live PTE slot in a kernel-mapped
    // table frame exclusively reached through this walk.
    unsafe {
        *entry_ptr = encode(paddr, flags | PteFlags::PRESENT);
    }
    flush_tlb(vaddr);
    Ok(())
}

pub fn unmap(space: AddressSpaceHandle, vaddr: VAddr) -> KResult<PAddr> {
    let entry_ptr = match walk(space.root, vaddr.as_u64(), false)? {
        Some(p) => p,
        None => {
            return Err(KernelError::Unmapped {
                addr: vaddr.as_usize(),
            })
        }
    };
    // SAFETY: entry_ptr from `walk` is always a valid PTE slot.
    let word = unsafe { *entry_ptr };
    if word & 1 == 0 {
        return Err(KernelError::Unmapped {
            addr: vaddr.as_usize(),
        });
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
    // SAFETY: entry_ptr from `walk` is always a valid PTE slot.
    let word = unsafe { *entry_ptr };
    if word & 1 == 0 {
        return None;
    }
    Some(decode(word))
}

/// Enumerate every present leaf mapping in the user half of `space`,
/// handing `(vaddr, paddr, flags)` to `callback`. Used by `fork` to clone
/// a parent's mappings into a freshly created child space.
pub fn for_each_user_leaf(space: AddressSpaceHandle, mut callback: impl FnMut(VAddr, PAddr, PteFlags)) {
    walk_leaves(space.root, PGTABLE_LEVELS - 1, 0, true, &mut callback);
}

fn walk_leaves(
    table: PAddr,
    level: usize,
    vaddr_base: u64,
    is_top: bool,
    callback: &mut impl FnMut(VAddr, PAddr, PteFlags),
) {
    let range_end = if is_top { 256 } else { ENTRIES_PER_LEVEL };
    let entries: alloc::vec::Vec<u64> = table_slice(table)[..range_end].to_vec();
    for (idx, entry) in entries.iter().enumerate() {
        if entry & 1 == 0 {
            continue;
        }
        let shift = 12 + 9 * level;
        let vaddr = vaddr_base | ((idx as u64) << shift);
        let child = PAddr::new(entry & 0x000F_FFFF_FFFF_F000);
        if level > 0 && entry & HUGE_BIT == 0 {
            walk_leaves(child, level - 1, vaddr, false, callback);
        } else {
            let (pa, flags) = decode(*entry);
            callback(VAddr::new(canonicalize(vaddr)), pa, flags);
        }
    }
}

fn canonicalize(vaddr: u64) -> u64 {
    if vaddr & (1 << 47) != 0 {
        vaddr | 0xFFFF_0000_0000_0000
    } else {
        vaddr
    }
}

pub fn flush_tlb(vaddr: VAddr) {
    // SAFETY: invlpg on an address this task owns is always sound.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) vaddr.as_u64(), options(nostack, preserves_flags));
    }
}

pub fn flush_tlb_all() {
    let cr3 = read_cr3();
    // SAFETY: reloading CR3 with its own value flushes all non-global TLB
    // entries; always valid on the current CPU.
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) cr3);
    }
}

pub fn switch_space(space: AddressSpaceHandle) {
    let current = read_cr3();
    if current != space.root.as_u64() {
        // SAFETY: `space.root` is a page-table root built by `create_space`
        // or the kernel's boot-time template.
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) space.root.as_u64());
        }
    }
    *CURRENT.lock() = Some(space);
}

pub fn current_space() -> AddressSpaceHandle {
    match *CURRENT.lock() {
        Some(space) => space,
        None => AddressSpaceHandle {
            root: PAddr::new(read_cr3()),
        },
    }
}

// Zone import kept for documentation parity with the other architectures'
// mmu modules, which size early page-table bootstrap allocations out of
// `Zone::Normal`.
#[allow(unused_imports)]
use Zone as _UnusedZoneImport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let pa = PAddr::new(0x20_0000);
        let flags = PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER;
        let (pa2, flags2) = decode(encode(pa, flags));
        assert_eq!(pa2, pa);
        assert!(flags2.contains(flags));
    }

    #[test]
    fn exec_flag_clears_nx_bit() {
        let word = encode(PAddr::new(0x1000), PteFlags::PRESENT | PteFlags::EXEC);
        assert_eq!(word & NX_BIT, 0);
        let word_noexec = encode(PAddr::new(0x1000), PteFlags::PRESENT);
        assert_eq!(word_noexec & NX_BIT, NX_BIT);
    }
}
