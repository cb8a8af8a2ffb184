//! Minimal ELF64 loader: header validation and `PT_LOAD` segment layout
//! for `execve` (C6). Grounded on the same field layout every ELF64
//! loader uses; parsing is the only thing this module does -- actually
//! reading the bytes into memory is `process::exec`'s job, since that's
//! where the fresh address space lives.

use alloc::vec::Vec;

use crate::error::{KernelError, KResult};
use crate::mm::VAddr;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    osabi: u8,
    abiversion: u8,
    pad: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

/// One `PT_LOAD` segment, resolved to the bytes `process::exec` should
/// copy into the freshly mapped destination and the flags that copy
/// should be writable under.
pub struct Segment<'a> {
    pub vaddr: VAddr,
    pub mem_size: usize,
    pub flags: u32,
    pub file_data: &'a [u8],
}

pub struct Image<'a> {
    pub entry: VAddr,
    pub segments: Vec<Segment<'a>>,
}

/// Parse and validate an ELF64 executable's header and program-header
/// table, returning its `PT_LOAD` segments. Rejects anything that is not
/// a little-endian, 64-bit, executable or position-independent-executable
/// ELF for this build's architecture.
pub fn parse(data: &[u8]) -> KResult<Image<'_>> {
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(KernelError::InvalidArgument { name: "elf: file too small" });
    }
    // SAFETY: length checked above; `Elf64Header` has no padding-sensitive
    // invariants beyond its declared fields, and we only read `data`
    // through this reference before checking `magic`/`class`/`data`.
    let header = unsafe { &*(data.as_ptr() as *const Elf64Header) };
    if header.magic != ELF_MAGIC {
        return Err(KernelError::InvalidArgument { name: "elf: bad magic" });
    }
    if header.class != ELF_CLASS_64 || header.data != ELF_DATA_2LSB {
        return Err(KernelError::InvalidArgument {
            name: "elf: not a little-endian 64-bit ELF",
        });
    }
    if header.elf_type != ET_EXEC && header.elf_type != ET_DYN {
        return Err(KernelError::InvalidArgument { name: "elf: not executable" });
    }
    let expected_machine: u16 = if cfg!(target_arch = "x86_64") {
        0x3E
    } else if cfg!(target_arch = "aarch64") {
        0xB7
    } else {
        0x03
    };
    if header.machine != expected_machine {
        return Err(KernelError::InvalidArgument { name: "elf: wrong machine" });
    }

    let ph_size = core::mem::size_of::<Elf64ProgramHeader>();
    let phoff = header.phoff as usize;
    let phnum = header.phnum as usize;
    let needed = phoff
        .checked_add(phnum.saturating_mul(ph_size))
        .ok_or(KernelError::InvalidArgument { name: "elf: overflowing phoff" })?;
    if needed > data.len() {
        return Err(KernelError::InvalidArgument {
            name: "elf: program header table out of bounds",
        });
    }

    let mut segments = Vec::new();
    for i in 0..phnum {
        let off = phoff + i * ph_size;
        // SAFETY: `off + ph_size <= data.len()` per the bounds check above.
        let ph = unsafe { &*(data.as_ptr().add(off) as *const Elf64ProgramHeader) };
        if ph.p_type != PT_LOAD {
            continue;
        }
        let file_start = ph.offset as usize;
        let file_end = file_start
            .checked_add(ph.filesz as usize)
            .ok_or(KernelError::InvalidArgument { name: "elf: overflowing segment size" })?;
        if file_end > data.len() || ph.memsz < ph.filesz {
            return Err(KernelError::InvalidArgument {
                name: "elf: segment out of bounds",
            });
        }
        segments.push(Segment {
            vaddr: VAddr::new(ph.vaddr),
            mem_size: ph.memsz as usize,
            flags: ph.flags,
            file_data: &data[file_start..file_end],
        });
    }

    Ok(Image {
        entry: VAddr::new(header.entry),
        segments,
    })
}
