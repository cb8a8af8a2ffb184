//! Socket-table concurrency pattern and netbuf contract (C-adjacent,
//! design notes only per spec.md 1's Non-goals: "the TCP/UDP protocol
//! engines and the socket layer" are out of scope; only the allocation
//! pattern and buffer contract below are actually specified).
//!
//! No protocol engine sits behind a [`Socket`] in this crate -- `recv`
//! always reports [`crate::error::KernelError::NotSupported`], honestly,
//! rather than faking a loopback echo. What *is* real is the table
//! itself, because `SYS_SOCKET` is a named, stable syscall number
//! (spec.md §6) and needs a slot-allocation story even with nothing
//! behind the slots yet.

extern crate alloc;

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KResult};

/// Upper bound on live sockets, mirroring the fd table's fixed-size
/// design (spec.md 4.6's "the fd table is full" pattern, applied here to
/// the socket table spec.md 4.7/9 calls out by name).
pub const MAX_SOCKETS: usize = 64;

/// Fixed-capacity byte queue every protocol engine would hand frames
/// through (spec.md 9, "the netbuf contract"). No engine is implemented,
/// so nothing ever pushes to this in the current crate -- its shape is
/// specified so that adding UDP/TCP later only means filling in
/// `push`/`pop` callers, not redesigning the buffer.
pub struct NetBuf {
    data: [u8; NetBuf::CAPACITY],
    len: usize,
}

impl NetBuf {
    pub const CAPACITY: usize = 2048;

    pub const fn empty() -> Self {
        Self {
            data: [0; Self::CAPACITY],
            len: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// A single socket's state. Nothing here is backed by a real protocol
/// engine (see module docs); the struct exists so the table's slot type
/// is concrete rather than `()`.
pub struct Socket {
    queue: Mutex<NetBuf>,
}

impl Socket {
    fn new() -> Self {
        Self {
            queue: Mutex::new(NetBuf::empty()),
        }
    }

    pub fn recv(&self, _buf: &mut [u8]) -> KResult<usize> {
        let _ = self.queue.lock();
        Err(KernelError::NotSupported {
            operation: "recv: no protocol engine backs this socket",
        })
    }
}

/// One socket-table slot. The `Allocating` state is the pattern spec.md
/// 4.7/9 names explicitly: a caller reserves a slot under the table
/// lock, releases it while constructing the (possibly expensive) socket
/// object, then re-acquires the lock only to install the finished
/// result -- readers skip `Allocating` slots as if they were `Empty`, so
/// no one ever observes a half-constructed socket.
enum Slot {
    Empty,
    Allocating,
    Ready(Arc<Socket>),
}

pub struct SocketTable {
    slots: Mutex<[Slot; MAX_SOCKETS]>,
}

impl SocketTable {
    pub const fn new() -> Self {
        const EMPTY: Slot = Slot::Empty;
        Self {
            slots: Mutex::new([EMPTY; MAX_SOCKETS]),
        }
    }

    /// Reserves a slot, constructs a fresh [`Socket`] outside the lock,
    /// then installs it. Returns the slot index as the socket's fd-space
    /// handle.
    pub fn alloc(&self) -> KResult<usize> {
        let index = {
            let mut slots = self.slots.lock();
            let index = slots
                .iter()
                .position(|s| matches!(s, Slot::Empty))
                .ok_or(KernelError::ResourceExhausted { resource: "socket table" })?;
            slots[index] = Slot::Allocating;
            index
        };

        let socket = Arc::new(Socket::new());
        self.slots.lock()[index] = Slot::Ready(socket);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> KResult<Arc<Socket>> {
        match self.slots.lock().get(index) {
            Some(Slot::Ready(socket)) => Ok(socket.clone()),
            _ => Err(KernelError::BadFileDescriptor { fd: index as i32 }),
        }
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref SOCKETS: SocketTable = SocketTable::new();
}
