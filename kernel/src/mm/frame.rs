//! Physical Memory Manager (C2): bitmap frame allocator with zones,
//! per-frame reference counts, huge pages, and a frame-protection list.
//!
//! All mutating and observing operations go through [`FrameAllocator`]'s
//! single spinlock-with-IRQ-save (spec.md §5) -- there is no lock-free
//! path anywhere in this module.

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::mm::VAddr;

pub const FRAME_SIZE: usize = 4096;
const MAX_PROTECTED: usize = 65536;

/// Virtual base of the kernel's direct physical-memory map, matching
/// spec.md's higher-half convention.
#[cfg(target_pointer_width = "64")]
const DIRECT_MAP_BASE: u64 = 0xFFFF_8000_0000_0000;
#[cfg(target_pointer_width = "32")]
const DIRECT_MAP_BASE: u64 = 0xC000_0000;

/// A physical address. 64 bits regardless of host word size, per
/// spec.md's Data Model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PAddr(u64);

impl PAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn pfn(self) -> u64 {
        self.0 / FRAME_SIZE as u64
    }

    pub const fn from_pfn(pfn: u64) -> Self {
        Self(pfn * FRAME_SIZE as u64)
    }

    pub const fn is_frame_aligned(self) -> bool {
        self.0 % FRAME_SIZE as u64 == 0
    }

    pub const fn offset(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }

    /// Convert to a virtual address in the kernel's direct physical map.
    /// Only valid for physical addresses that are actually kernel-mapped
    /// (all RAM reported by firmware, on this kernel's boot contract).
    pub const fn to_kernel_virt(self) -> VAddr {
        VAddr::new(self.0.wrapping_add(DIRECT_MAP_BASE))
    }
}

/// Memory zone, derived from a frame's address -- never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// `[0, 16 MiB)`.
    Dma,
    /// `[16 MiB, 896 MiB)` on i686, `[16 MiB, ∞)` on 64-bit.
    Normal,
    /// i686-only: `[896 MiB, 2 GiB)`.
    High,
}

const DMA_END_FRAME: u64 = 16 * 1024 * 1024 / FRAME_SIZE as u64;
#[cfg(target_pointer_width = "32")]
const NORMAL_END_FRAME: u64 = 896 * 1024 * 1024 / FRAME_SIZE as u64;
#[cfg(target_pointer_width = "32")]
const HIGH_END_FRAME: u64 = 2u64 * 1024 * 1024 * 1024 / FRAME_SIZE as u64;

impl Zone {
    pub fn range(self) -> (u64, u64) {
        match self {
            Zone::Dma => (0, DMA_END_FRAME),
            #[cfg(target_pointer_width = "32")]
            Zone::Normal => (DMA_END_FRAME, NORMAL_END_FRAME),
            #[cfg(target_pointer_width = "64")]
            Zone::Normal => (DMA_END_FRAME, u64::MAX),
            #[cfg(target_pointer_width = "32")]
            Zone::High => (NORMAL_END_FRAME, HIGH_END_FRAME),
            #[cfg(target_pointer_width = "64")]
            Zone::High => (0, 0),
        }
    }

    pub fn contains(self, pfn: u64) -> bool {
        let (start, end) = self.range();
        pfn >= start && pfn < end
    }

    pub fn for_pfn(pfn: u64) -> Self {
        if Zone::Dma.contains(pfn) {
            Zone::Dma
        } else if cfg!(target_pointer_width = "32") && Zone::High.contains(pfn) {
            Zone::High
        } else {
            Zone::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysAllocError {
    OutOfMemory,
    InvalidFrame,
    Unaligned,
    Protected,
    NotUsed,
}

impl From<PhysAllocError> for KernelError {
    fn from(e: PhysAllocError) -> Self {
        match e {
            PhysAllocError::OutOfMemory => KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: 0,
            },
            PhysAllocError::InvalidFrame => KernelError::InvalidAddress { addr: 0 },
            PhysAllocError::Unaligned => KernelError::Unaligned {
                addr: 0,
                align: FRAME_SIZE,
            },
            PhysAllocError::Protected => KernelError::FrameProtected { addr: 0 },
            PhysAllocError::NotUsed => KernelError::DoubleFree { addr: 0 },
        }
    }
}

pub type PResult<T> = core::result::Result<T, PhysAllocError>;

/// A region reported by the firmware memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: PAddr,
    pub end: PAddr,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInfo {
    pub total: usize,
    pub free: usize,
    pub used: usize,
    pub reserved: usize,
    pub kernel: usize,
    pub bitmap: usize,
}

/// Bounded set of protected frames (spec.md: "≤65536 entries"). Backed by
/// a flat array rather than the used-bit bitmap because membership is
/// expected to be rare and the bitmap already answers "used?" -- this
/// answers the orthogonal "may this be freed?" question.
struct ProtectedSet {
    pfns: [u64; MAX_PROTECTED],
    len: usize,
}

impl ProtectedSet {
    const fn new() -> Self {
        Self {
            pfns: [u64::MAX; MAX_PROTECTED],
            len: 0,
        }
    }

    fn contains(&self, pfn: u64) -> bool {
        self.pfns[..self.len].contains(&pfn)
    }

    fn insert(&mut self, pfn: u64) -> bool {
        if self.contains(pfn) {
            return true;
        }
        if self.len == MAX_PROTECTED {
            return false;
        }
        self.pfns[self.len] = pfn;
        self.len += 1;
        true
    }

    fn remove(&mut self, pfn: u64) {
        if let Some(idx) = self.pfns[..self.len].iter().position(|&p| p == pfn) {
            self.len -= 1;
            self.pfns[idx] = self.pfns[self.len];
            self.pfns[self.len] = u64::MAX;
        }
    }
}

struct Inner {
    bitmap: &'static mut [u64],
    refcounts: &'static mut [u16],
    total_frames: usize,
    free_frames: usize,
    last_free_word: usize,
    kernel_frames: usize,
    reserved_frames: usize,
    protected: ProtectedSet,
}

impl Inner {
    fn bit(&self, pfn: u64) -> bool {
        let i = pfn as usize;
        self.bitmap[i / 64] & (1 << (i % 64)) != 0
    }

    fn set_bit(&mut self, pfn: u64) {
        let i = pfn as usize;
        self.bitmap[i / 64] |= 1 << (i % 64);
    }

    fn clear_bit(&mut self, pfn: u64) {
        let i = pfn as usize;
        self.bitmap[i / 64] &= !(1 << (i % 64));
    }

    fn in_range(&self, pfn: u64) -> bool {
        (pfn as usize) < self.total_frames
    }

    /// Rotating bitmap scan: find `count` consecutive clear bits,
    /// restarting from the beginning on wraparound. `zone` optionally
    /// clamps the search range.
    fn find_free_run(&mut self, count: usize, zone: Option<Zone>) -> Option<u64> {
        let (lo, hi) = match zone {
            Some(z) => {
                let (s, e) = z.range();
                (s, e.min(self.total_frames as u64))
            }
            None => (0, self.total_frames as u64),
        };
        if lo >= hi {
            return None;
        }
        let words = self.bitmap.len();
        let mut start_word = self.last_free_word.min(words.saturating_sub(1));
        for pass in 0..2 {
            let word_range: alloc_range::Range = if pass == 0 {
                start_word..words
            } else {
                0..start_word
            };
            for word_idx in word_range {
                if self.bitmap[word_idx] == u64::MAX {
                    continue;
                }
                let mut run = 0usize;
                let mut run_start = 0u64;
                for bit in 0..64 {
                    let pfn = (word_idx * 64 + bit) as u64;
                    if pfn >= hi {
                        break;
                    }
                    let used = self.bitmap[word_idx] & (1 << bit) != 0;
                    let in_zone = pfn >= lo && self.in_range(pfn);
                    if !used && in_zone {
                        if run == 0 {
                            run_start = pfn;
                        }
                        run += 1;
                        if run == count {
                            self.last_free_word = word_idx;
                            return Some(run_start);
                        }
                    } else {
                        run = 0;
                    }
                }
            }
            start_word = 0;
        }
        self.last_free_word = 0;
        None
    }

    fn mark_used(&mut self, pfn: u64, count: usize) {
        for i in 0..count {
            self.set_bit(pfn + i as u64);
            self.refcounts[(pfn as usize) + i] = 1;
        }
        self.free_frames -= count;
    }
}

mod alloc_range {
    pub type Range = core::ops::Range<usize>;
}

/// The physical frame allocator. A single global instance ([`PMM`]) backs
/// every caller; initialization happens once, explicitly, from
/// [`crate::mm::init`].
pub struct FrameAllocator {
    inner: Mutex<Option<Inner>>,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Parse the firmware memory map and bring the allocator up. Places
    /// the bitmap at the first page-aligned address past `kernel_end`,
    /// the refcount array immediately after, and marks every frame used
    /// by the kernel image, those two tables, and firmware reservations.
    pub fn init(&self, memory_map: &[MemoryRegion], kernel_end: PAddr) {
        crate::hal::with_irq_disabled(|| {
            let mut guard = self.inner.lock();
            assert!(guard.is_none(), "pmm::init called twice");

            let highest = memory_map.iter().map(|r| r.end.as_u64()).max().unwrap_or(0);
            #[cfg(target_pointer_width = "32")]
            let ceiling = 2u64 * 1024 * 1024 * 1024;
            #[cfg(target_pointer_width = "64")]
            let ceiling = u64::MAX;
            let total_frames = ((highest.min(ceiling)) / FRAME_SIZE as u64) as usize;

            let bitmap_words = total_frames.div_ceil(64);
            let bitmap_bytes = bitmap_words * 8;
            let bitmap_start = align_up(kernel_end.as_u64(), FRAME_SIZE as u64);
            let refcount_start = align_up(bitmap_start + bitmap_bytes as u64, 2);
            let refcount_bytes = total_frames * 2;
            let tables_end = align_up(refcount_start + refcount_bytes as u64, FRAME_SIZE as u64);

            // SAFETY: `bitmap_start`/`refcount_start` are carved out of
            // kernel-mapped physical memory immediately past the kernel
            // image, before any other allocator can hand out those
            // frames; these are the only references to this memory for
            // the lifetime of the kernel.
            let bitmap: &'static mut [u64] = unsafe {
                core::slice::from_raw_parts_mut(
                    PAddr::new(bitmap_start).to_kernel_virt().as_usize() as *mut u64,
                    bitmap_words,
                )
            };
            // SAFETY: see above.
            let refcounts: &'static mut [u16] = unsafe {
                core::slice::from_raw_parts_mut(
                    PAddr::new(refcount_start).to_kernel_virt().as_usize() as *mut u16,
                    total_frames,
                )
            };

            bitmap.fill(u64::MAX); // everything starts "used"; available regions are cleared below
            refcounts.fill(0);

            let mut inner = Inner {
                bitmap,
                refcounts,
                total_frames,
                free_frames: 0,
                last_free_word: 0,
                kernel_frames: (tables_end - kernel_end.as_u64()) as usize / FRAME_SIZE,
                reserved_frames: 0,
                protected: ProtectedSet::new(),
            };

            for region in memory_map {
                if !region.available {
                    inner.reserved_frames += region_frame_count(region);
                    continue;
                }
                let start_pfn = region.start.pfn();
                let end_pfn = region.end.pfn().min(total_frames as u64);
                for pfn in start_pfn..end_pfn {
                    let paddr = pfn * FRAME_SIZE as u64;
                    // Never clear frames occupied by the kernel image or
                    // the tables just carved out of it.
                    if paddr < tables_end {
                        continue;
                    }
                    inner.clear_bit(pfn);
                    inner.free_frames += 1;
                }
            }

            log::info!(
                "pmm: {} total frames, {} free, bitmap at {:#x}, refcounts at {:#x}",
                total_frames,
                inner.free_frames,
                bitmap_start,
                refcount_start
            );

            *guard = Some(inner);
        });
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        crate::hal::with_irq_disabled(|| {
            let mut guard = self.inner.lock();
            let inner = guard.as_mut().expect("pmm used before init");
            f(inner)
        })
    }

    pub fn alloc_frame(&self) -> Option<PAddr> {
        self.alloc_frames(1)
    }

    pub fn alloc_frame_zone(&self, zone: Zone) -> Option<PAddr> {
        self.alloc_frames_zone(1, zone)
    }

    pub fn alloc_frames(&self, n: usize) -> Option<PAddr> {
        self.with_inner(|inner| {
            let pfn = inner.find_free_run(n, None)?;
            if inner.protected.contains(pfn) {
                // A protected frame showing up as "free" in the bitmap is
                // impossible by invariant, but fail safely rather than
                // hand out a protected page.
                log::error!("pmm: protected frame {pfn:#x} found free -- refusing allocation");
                return None;
            }
            inner.mark_used(pfn, n);
            // SAFETY: the frame was just marked used and is exclusively
            // ours; zeroing it is required before handing it to a new
            // owner (COW/refcount invariants assume fresh frames start
            // clean).
            unsafe {
                zero_frame(PAddr::from_pfn(pfn), n);
            }
            Some(PAddr::from_pfn(pfn))
        })
    }

    pub fn alloc_frames_zone(&self, n: usize, zone: Zone) -> Option<PAddr> {
        self.with_inner(|inner| {
            let pfn = inner.find_free_run(n, Some(zone))?;
            if inner.protected.contains(pfn) {
                // See `alloc_frames`: a protected frame showing up as free
                // is impossible by invariant, but fail safely.
                log::error!("pmm: protected frame {pfn:#x} found free -- refusing allocation");
                return None;
            }
            inner.mark_used(pfn, n);
            // SAFETY: see `alloc_frames`.
            unsafe {
                zero_frame(PAddr::from_pfn(pfn), n);
            }
            Some(PAddr::from_pfn(pfn))
        })
    }

    /// 2 MiB, 2 MiB-aligned allocation: 512 consecutive frames starting on
    /// a 512-frame boundary.
    pub fn alloc_huge_page(&self) -> Option<PAddr> {
        const HUGE_FRAMES: usize = 512;
        self.with_inner(|inner| {
            let words = inner.bitmap.len();
            let mut word = 0;
            while word < words {
                // Candidate start must be frame-aligned to 512.
                let candidate_pfn = (word * 64) as u64;
                if candidate_pfn % HUGE_FRAMES as u64 == 0 {
                    let all_free = (0..HUGE_FRAMES).all(|i| {
                        let pfn = candidate_pfn + i as u64;
                        inner.in_range(pfn) && !inner.bit(pfn)
                    });
                    if all_free {
                        inner.mark_used(candidate_pfn, HUGE_FRAMES);
                        // SAFETY: see `alloc_frames`.
                        unsafe {
                            zero_frame(PAddr::from_pfn(candidate_pfn), HUGE_FRAMES);
                        }
                        return Some(PAddr::from_pfn(candidate_pfn));
                    }
                }
                word += HUGE_FRAMES / 64;
            }
            None
        })
    }

    /// Decrements refcount if >1, otherwise actually frees the frame.
    /// Protected, unused, unaligned, or out-of-range frames are rejected
    /// (or silently ignored for "unused", per spec.md §4.2).
    pub fn free_frame(&self, pa: PAddr) -> PResult<()> {
        self.free_frames_impl(pa, 1)
    }

    pub fn free_frames(&self, pa: PAddr, n: usize) -> PResult<()> {
        self.free_frames_impl(pa, n)
    }

    pub fn free_huge_page(&self, pa: PAddr) -> PResult<()> {
        self.free_frames_impl(pa, 512)
    }

    fn free_frames_impl(&self, pa: PAddr, n: usize) -> PResult<()> {
        if !pa.is_frame_aligned() {
            return Err(PhysAllocError::Unaligned);
        }
        self.with_inner(|inner| {
            let start_pfn = pa.pfn();
            if !inner.in_range(start_pfn) || !inner.in_range(start_pfn + n as u64 - 1) {
                return Err(PhysAllocError::InvalidFrame);
            }
            for i in 0..n {
                let pfn = start_pfn + i as u64;
                if inner.protected.contains(pfn) {
                    log::warn!("pmm: refused to free protected frame {pfn:#x}");
                    return Err(PhysAllocError::Protected);
                }
                if !inner.bit(pfn) {
                    log::warn!("pmm: free of already-unused frame {pfn:#x} ignored");
                    continue;
                }
                let rc = &mut inner.refcounts[pfn as usize];
                if *rc > 1 {
                    *rc -= 1;
                    continue;
                }
                *rc = 0;
                inner.clear_bit(pfn);
                inner.free_frames += 1;
            }
            Ok(())
        })
    }

    pub fn frame_ref_inc(&self, pa: PAddr) -> PResult<u16> {
        self.with_inner(|inner| {
            let pfn = pa.pfn();
            if !inner.in_range(pfn) || !inner.bit(pfn) {
                return Err(PhysAllocError::InvalidFrame);
            }
            let rc = &mut inner.refcounts[pfn as usize];
            *rc = rc.saturating_add(1);
            Ok(*rc)
        })
    }

    pub fn frame_ref_dec(&self, pa: PAddr) -> PResult<u16> {
        self.with_inner(|inner| {
            let pfn = pa.pfn();
            if !inner.in_range(pfn) || !inner.bit(pfn) {
                return Err(PhysAllocError::InvalidFrame);
            }
            let rc = &mut inner.refcounts[pfn as usize];
            *rc = rc.saturating_sub(1);
            Ok(*rc)
        })
    }

    pub fn frame_get_refcount(&self, pa: PAddr) -> u16 {
        self.with_inner(|inner| {
            let pfn = pa.pfn();
            if inner.in_range(pfn) {
                inner.refcounts[pfn as usize]
            } else {
                0
            }
        })
    }

    pub fn protect_frame(&self, pa: PAddr) -> PResult<()> {
        self.with_inner(|inner| {
            let pfn = pa.pfn();
            if !inner.in_range(pfn) || !inner.bit(pfn) {
                return Err(PhysAllocError::InvalidFrame);
            }
            if !inner.protected.insert(pfn) {
                log::error!("pmm: protected-frame table overflow at {pfn:#x}");
                return Err(PhysAllocError::OutOfMemory);
            }
            Ok(())
        })
    }

    pub fn unprotect_frame(&self, pa: PAddr) {
        self.with_inner(|inner| inner.protected.remove(pa.pfn()));
    }

    pub fn is_frame_protected(&self, pa: PAddr) -> bool {
        self.with_inner(|inner| inner.protected.contains(pa.pfn()))
    }

    pub fn get_info(&self) -> FrameInfo {
        self.with_inner(|inner| FrameInfo {
            total: inner.total_frames,
            free: inner.free_frames,
            used: inner.total_frames - inner.free_frames - inner.reserved_frames,
            reserved: inner.reserved_frames,
            kernel: inner.kernel_frames,
            bitmap: inner.bitmap.len() * 8,
        })
    }

    /// Cross-checks bitmap state against refcounts and the protected set.
    /// Never panics; a detected inconsistency is logged and reported
    /// through the return value, per spec.md's Consistency-failure class.
    pub fn verify_consistency(&self) -> bool {
        self.with_inner(|inner| {
            let mut ok = true;
            let mut free_count = 0usize;
            for pfn in 0..inner.total_frames as u64 {
                let used = inner.bit(pfn);
                let rc = inner.refcounts[pfn as usize];
                if used && rc == 0 {
                    log::error!("pmm: frame {pfn:#x} used but refcount 0");
                    ok = false;
                }
                if !used {
                    free_count += 1;
                    if rc != 0 {
                        log::error!("pmm: frame {pfn:#x} free but refcount {rc}");
                        ok = false;
                    }
                }
                if inner.protected.contains(pfn) && !used {
                    log::error!("pmm: protected frame {pfn:#x} not marked used");
                    ok = false;
                }
            }
            if free_count != inner.free_frames {
                log::error!(
                    "pmm: bitmap free count {free_count} disagrees with tracked {}",
                    inner.free_frames
                );
                ok = false;
            }
            ok
        })
    }

    pub fn print_diagnostics(&self) {
        let info = self.get_info();
        log::info!(
            "pmm: total={} free={} used={} reserved={} kernel={} bitmap_bytes={}",
            info.total,
            info.free,
            info.used,
            info.reserved,
            info.kernel,
            info.bitmap
        );
    }
}

fn region_frame_count(region: &MemoryRegion) -> usize {
    ((region.end.as_u64() - region.start.as_u64()) / FRAME_SIZE as u64) as usize
}

const fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}

/// # Safety
/// `[pa, pa + n*FRAME_SIZE)` must be exclusively owned by the caller and
/// mapped in the kernel's direct map.
unsafe fn zero_frame(pa: PAddr, n: usize) {
    let bytes = n * FRAME_SIZE;
    let ptr = pa.to_kernel_virt().as_usize() as *mut u8;
    // SAFETY: forwarded from the function's contract.
    unsafe {
        core::ptr::write_bytes(ptr, 0, bytes);
    }
}

pub static PMM: FrameAllocator = FrameAllocator::new();

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pmm() -> FrameAllocator {
        let pmm = FrameAllocator::new();
        // Host-side unit tests can't carve real physical memory, so they
        // exercise `Inner` through a heap-backed stand-in region instead
        // of calling `init` against a firmware memory map.
        let total_frames = 4096usize; // 16 MiB worth of frames
        let bitmap_words = total_frames.div_ceil(64);
        let bitmap: &'static mut [u64] =
            Box::leak(vec![0u64; bitmap_words].into_boxed_slice());
        let refcounts: &'static mut [u16] =
            Box::leak(vec![0u16; total_frames].into_boxed_slice());
        *pmm.inner.lock() = Some(Inner {
            bitmap,
            refcounts,
            total_frames,
            free_frames: total_frames,
            last_free_word: 0,
            kernel_frames: 0,
            reserved_frames: 0,
            protected: ProtectedSet::new(),
        });
        pmm
    }

    extern crate alloc;
    use alloc::boxed::Box;
    use alloc::vec;

    #[test]
    fn p1_alloc_frame_alignment_and_uniqueness() {
        let pmm = test_pmm();
        let mut seen = alloc::vec::Vec::new();
        for _ in 0..64 {
            let pa = pmm.alloc_frame().expect("frame available");
            assert_ne!(pa.as_u64(), 0);
            assert!(pa.is_frame_aligned());
            assert!(!seen.contains(&pa));
            seen.push(pa);
        }
    }

    #[test]
    fn p2_alloc_free_round_trip_restores_free_count() {
        let pmm = test_pmm();
        let before = pmm.get_info().free;
        let frames: alloc::vec::Vec<_> = (0..32).map(|_| pmm.alloc_frame().unwrap()).collect();
        for f in frames {
            pmm.free_frame(f).unwrap();
        }
        assert_eq!(pmm.get_info().free, before);
    }

    #[test]
    fn p3_refcount_algebra_is_independent_per_frame() {
        let pmm = test_pmm();
        let a = pmm.alloc_frame().unwrap();
        let b = pmm.alloc_frame().unwrap();
        for _ in 0..5 {
            pmm.frame_ref_inc(a).unwrap();
        }
        for _ in 0..2 {
            pmm.frame_ref_dec(a).unwrap();
        }
        assert_eq!(pmm.frame_get_refcount(a), 1 + 5 - 2);
        assert_eq!(pmm.frame_get_refcount(b), 1);
    }

    #[test]
    fn p4_cow_defer_free_keeps_bit_until_last_reference() {
        let pmm = test_pmm();
        let pa = pmm.alloc_frame().unwrap();
        pmm.frame_ref_inc(pa).unwrap(); // refcount now 2
        let free_before = pmm.get_info().free;
        pmm.free_frame(pa).unwrap(); // decrements to 1, stays "used"
        assert_eq!(pmm.get_info().free, free_before);
        assert_eq!(pmm.frame_get_refcount(pa), 1);
        pmm.free_frame(pa).unwrap(); // actually frees now
        assert_eq!(pmm.get_info().free, free_before + 1);
    }

    #[test]
    fn protected_frame_rejects_free_and_stays_used() {
        let pmm = test_pmm();
        let pa = pmm.alloc_frame().unwrap();
        pmm.protect_frame(pa).unwrap();
        assert!(pmm.is_frame_protected(pa));
        assert_eq!(pmm.free_frame(pa), Err(PhysAllocError::Protected));
        pmm.unprotect_frame(pa);
        assert!(pmm.free_frame(pa).is_ok());
    }

    #[test]
    fn verify_consistency_holds_after_mixed_operations() {
        let pmm = test_pmm();
        let frames: alloc::vec::Vec<_> = (0..16).map(|_| pmm.alloc_frame().unwrap()).collect();
        pmm.frame_ref_inc(frames[0]).unwrap();
        pmm.free_frame(frames[1]).unwrap();
        assert!(pmm.verify_consistency());
    }

    #[test]
    fn huge_page_allocation_is_2mib_aligned() {
        let pmm = test_pmm();
        let pa = pmm.alloc_huge_page().expect("enough frames for one huge page");
        assert_eq!(pa.pfn() % 512, 0);
        assert_eq!(pmm.frame_get_refcount(pa), 1);
    }
}
