//! The unified page-table-entry flag set (C3).
//!
//! Every architecture's HAL implementation maps this single logical flag
//! set onto its own bit layout (`hal::arch_impl::mmu::encode`/`decode`).
//! Bits an architecture cannot represent (e.g. `EXEC` on i686, which has
//! no hardware NX bit) are silently satisfied by the present/writable
//! semantics already in force -- the flag is accepted, just not enforced
//! independently.

use bitflags::bitflags;

use crate::mm::frame::PAddr;

bitflags! {
    /// Logical page-table-entry flags, architecture-neutral.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u16 {
        const PRESENT  = 1 << 0;
        const WRITE    = 1 << 1;
        const USER     = 1 << 2;
        const NOCACHE  = 1 << 3;
        const ACCESSED = 1 << 4;
        const DIRTY    = 1 << 5;
        /// Software-only bit: page is copy-on-write. Cleared together with
        /// setting `WRITE` by the COW fault service once the last sharer
        /// claims sole ownership.
        const COW      = 1 << 6;
        const EXEC     = 1 << 7;
    }
}

pub const UNIFIED_FLAGS_NONE: PteFlags = PteFlags::empty();

/// Total function: pack a 4 KiB-aligned physical address and a flag set
/// into an architecture-neutral logical PTE image. Round-trips with
/// [`decode`] per spec.md P5: `decode(encode(pa, flags)) == (pa, flags')`
/// with `flags subset-of flags'`.
pub const fn make_pte(pa: PAddr, flags: PteFlags) -> u64 {
    (pa.as_u64() & !0xFFF) | flags.bits() as u64
}

/// Inverse of [`make_pte`] for the architecture-neutral image (not the
/// hardware encoding -- each HAL implementation has its own
/// `encode`/`decode` pair that maps to and from hardware bit positions,
/// calling through these two at the edges).
pub const fn split_pte(word: u64) -> (PAddr, PteFlags) {
    let pa = PAddr::new(word & !0xFFF);
    let flags = PteFlags::from_bits_truncate((word & 0xFFF) as u16);
    (pa, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pte_round_trip_preserves_address_and_flags() {
        let cases = [
            (PAddr::new(0x1000), PteFlags::PRESENT | PteFlags::WRITE),
            (PAddr::new(0x4000_0000), PteFlags::PRESENT | PteFlags::USER | PteFlags::COW),
            (PAddr::new(0xFFFF_F000), PteFlags::empty()),
        ];
        for (pa, flags) in cases {
            let (pa2, flags2) = split_pte(make_pte(pa, flags));
            assert_eq!(pa2, pa);
            assert!(flags2.contains(flags));
        }
    }
}
