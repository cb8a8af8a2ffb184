//! Network-domain syscalls (`0x06xx`). Per spec.md's Non-goals the
//! TCP/UDP protocol engines are out of scope; `SYS_SOCKET` only exercises
//! the socket-table allocation pattern ([`crate::net::SocketTable`]).

use crate::error::KResult;
use crate::net::SOCKETS;

/// `socket(domain, type)`: both arguments are currently ignored (there
/// is exactly one socket table and no protocol engine to select between)
/// but are accepted for ABI stability with a real future implementation.
pub fn sys_socket(_domain: u64, _kind: u64) -> KResult<isize> {
    let fd = SOCKETS.alloc()?;
    Ok(fd as isize)
}
