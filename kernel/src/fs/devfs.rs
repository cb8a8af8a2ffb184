//! The one device node this kernel actually backs: `/dev/console`.
//!
//! spec.md names the devfs table as out of scope beyond the interface
//! `execve`/the syscall layer consume; this is that interface's single
//! concrete instance, wired straight to the serial port the `log` backend
//! already owns, so a user task's `write(1, ...)` and the kernel's own
//! boot log share one sink.

use super::file::OpenFile;

/// Resolve a devfs path to an [`OpenFile`]. The only entry is
/// `/dev/console`; everything else is unresolved (the caller maps that to
/// `NotFound`).
pub fn lookup(path: &str) -> Option<OpenFile> {
    match path {
        "/dev/console" => Some(OpenFile::Console),
        _ => None,
    }
}
