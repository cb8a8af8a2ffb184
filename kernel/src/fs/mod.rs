//! Virtual filesystem interface (C6 collaborator).
//!
//! spec.md explicitly scopes out the filesystem implementation proper --
//! no devfs table, no `vfs_read`/`vfs_write` leaf callbacks. What *is*
//! specified is the narrow interface `execve` and the syscall layer
//! consume: a path lookup that yields either a byte slurp (for `execve`)
//! or an open character-device handle (for `open`/`read`/`write`). This
//! module is that interface plus the one concrete device (`/dev/console`)
//! the syscall surface needs to satisfy "ensure fds 0/1/2 are wired to
//! /dev/console if not already".

extern crate alloc;

pub mod devfs;
pub mod file;

pub use file::{FdTable, OpenFile, MAX_OPEN_FILES};

use crate::error::{KernelError, KResult};

/// Slurp the entire contents of `path`. The only caller is `execve`
/// (spec.md 4.5); every other file access goes through [`OpenFile`]. No
/// concrete filesystem is implemented here -- per spec.md's Non-goals,
/// only the interface boundary is specified, so every path but the
/// registered device nodes resolves to [`KernelError::NotFound`].
pub fn read_file(path: &str) -> KResult<alloc::vec::Vec<u8>> {
    if devfs::lookup(path).is_some() {
        return Err(KernelError::InvalidArgument {
            name: "path refers to a device, not a regular file",
        });
    }
    Err(KernelError::NotFound)
}

/// Open `path` for the calling task, returning a handle ready to install
/// in an [`FdTable`]. Only device nodes registered in [`devfs`] resolve;
/// anything else is `NotFound`.
pub fn open(path: &str) -> KResult<OpenFile> {
    devfs::lookup(path).ok_or(KernelError::NotFound)
}
