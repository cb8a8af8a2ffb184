//! Per-process file-descriptor table (C6, "POSIX expects" list: open,
//! close, read, write, dup).

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::print;

/// Upper bound on simultaneously open descriptors per task. spec.md names
/// the fd table as a bounded resource ("the fd table is full" is one of
/// the named resource-exhaustion errors); this kernel has no inode-backed
/// files to justify a larger table.
pub const MAX_OPEN_FILES: usize = 32;

/// What a file descriptor actually refers to. The only concrete backing
/// is the console device; everything else named in spec.md's VFS
/// interface (regular files, pipes, sockets as fds) is out of scope for
/// this crate.
#[derive(Debug, Clone)]
pub enum OpenFile {
    Console,
}

impl OpenFile {
    pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        match self {
            // Non-blocking: drains whatever the PS/2 keyboard driver has
            // already buffered. A real terminal blocks fd 0 until a line
            // is available; this kernel leaves that polling loop to the
            // caller (spec.md 9: `task_yield` is the only suspension
            // point), so an empty ring just reads as 0 bytes, not EOF.
            OpenFile::Console => Ok(crate::drivers::keyboard::read(buf)),
        }
    }

    pub fn write(&self, buf: &[u8]) -> KResult<usize> {
        match self {
            OpenFile::Console => {
                let text = core::str::from_utf8(buf).unwrap_or("<binary>");
                print::_print(format_args!("{text}"));
                Ok(buf.len())
            }
        }
    }
}

/// Fixed-size table of `Option<Arc<OpenFile>>` slots. Sharing is `Arc`
/// clone, exactly mirroring `fork`'s "increment the open-file refcounts"
/// contract (spec.md 4.6) -- dropping the table's last reference to a
/// slot is the only "close".
pub struct FdTable {
    slots: [Option<Arc<OpenFile>>; MAX_OPEN_FILES],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Install `file` in the lowest-numbered free slot, POSIX-style.
    pub fn install(&mut self, file: OpenFile) -> KResult<i32> {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Arc::new(file));
                return Ok(fd as i32);
            }
        }
        Err(KernelError::TooManyOpenFiles)
    }

    /// Force `file` into a specific fd number, used by `execve`'s
    /// "wire stdio if absent" step. Overwrites whatever was there.
    pub fn install_at(&mut self, fd: i32, file: OpenFile) -> KResult<()> {
        let slot = self
            .slots
            .get_mut(fd as usize)
            .ok_or(KernelError::BadFileDescriptor { fd })?;
        *slot = Some(Arc::new(file));
        Ok(())
    }

    pub fn get(&self, fd: i32) -> KResult<Arc<OpenFile>> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.clone())
            .ok_or(KernelError::BadFileDescriptor { fd })
    }

    pub fn close(&mut self, fd: i32) -> KResult<()> {
        let slot = self
            .slots
            .get_mut(fd as usize)
            .ok_or(KernelError::BadFileDescriptor { fd })?;
        if slot.take().is_none() {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        Ok(())
    }

    /// `dup`: install a new reference to `oldfd`'s file at the
    /// lowest-numbered free slot.
    pub fn dup(&mut self, oldfd: i32) -> KResult<i32> {
        let file = self.get(oldfd)?;
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd as i32);
            }
        }
        Err(KernelError::TooManyOpenFiles)
    }

    /// `dup2`: install a new reference to `oldfd`'s file at exactly
    /// `newfd`, closing whatever was previously there.
    pub fn dup2(&mut self, oldfd: i32, newfd: i32) -> KResult<i32> {
        let file = self.get(oldfd)?;
        let slot = self
            .slots
            .get_mut(newfd as usize)
            .ok_or(KernelError::BadFileDescriptor { fd: newfd })?;
        *slot = Some(file);
        Ok(newfd)
    }

    pub fn is_open(&self, fd: i32) -> bool {
        self.slots
            .get(fd as usize)
            .is_some_and(|s| s.is_some())
    }

    /// `fork`'s fd-table duplication: every open slot's `Arc` is cloned
    /// into the child table, bumping the shared refcount exactly as
    /// spec.md 4.5 step 5 requires.
    pub fn clone_for_fork(&self) -> Self {
        Self {
            slots: core::array::from_fn(|i| self.slots[i].clone()),
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
