//! Kernel-wide error taxonomy.
//!
//! Every fallible kernel-internal operation returns `Result<T, KernelError>`.
//! The syscall dispatcher is the only place that narrows this into the
//! POSIX-style negative `isize` the user ABI expects; nothing else in the
//! kernel translates errors into raw integers.

use core::fmt;

/// Kernel-internal error type covering the taxonomy described in the
/// error-handling design: resource exhaustion, invalid argument, state
/// violation, and consistency failure. Unrecoverable conditions (double
/// HAL init, page fault in kernel text) are not represented here -- they
/// panic directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No physical frames available to satisfy the request.
    OutOfMemory { requested: usize, available: usize },
    /// Address is not aligned to the required boundary.
    Unaligned { addr: usize, align: usize },
    /// Address is outside any region the caller may reference.
    InvalidAddress { addr: usize },
    /// A virtual address has no mapping in the address space queried.
    Unmapped { addr: usize },
    /// Generic bad-argument case, named per call site.
    InvalidArgument { name: &'static str },
    /// The frame/task/fd table has no free slots.
    ResourceExhausted { resource: &'static str },
    /// The PCB table (`MAX_TASKS` slots) has no free slot for a new task.
    NoFreeTask,
    /// A frame was freed twice, or a task/fd double-released.
    DoubleFree { addr: usize },
    /// The frame is a member of the protected set and cannot be freed.
    FrameProtected { addr: usize },
    /// An operation was attempted from a state that forbids it.
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// No process/thread with the given id exists.
    NoSuchProcess { pid: u64 },
    /// The caller has no child matching the wait filter.
    NoSuchChild,
    /// Internal bookkeeping disagreed with itself (bitmap vs refcounts,
    /// protected-but-unused frame, dangling parent link, ...).
    ConsistencyViolation { detail: &'static str },
    /// The open-file-descriptor table is full.
    TooManyOpenFiles,
    /// No file descriptor with that number is open in this process.
    BadFileDescriptor { fd: i32 },
    /// VFS lookup failed to find a path.
    NotFound,
    /// The requested operation is not implemented for this target.
    NotSupported { operation: &'static str },
    /// Transfer or operation exceeded its wall-clock deadline.
    Timeout,
    /// Device reported a hardware-level failure.
    HardwareFault { device: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory {
                requested,
                available,
            } => write!(f, "out of memory: requested {requested}, available {available}"),
            KernelError::Unaligned { addr, align } => {
                write!(f, "address {addr:#x} not aligned to {align}")
            }
            KernelError::InvalidAddress { addr } => write!(f, "invalid address {addr:#x}"),
            KernelError::Unmapped { addr } => write!(f, "address {addr:#x} not mapped"),
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            KernelError::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {resource}")
            }
            KernelError::NoFreeTask => write!(f, "no free task slot"),
            KernelError::DoubleFree { addr } => write!(f, "double free at {addr:#x}"),
            KernelError::FrameProtected { addr } => write!(f, "frame {addr:#x} is protected"),
            KernelError::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {expected}, got {actual}")
            }
            KernelError::NoSuchProcess { pid } => write!(f, "no such process: {pid}"),
            KernelError::NoSuchChild => write!(f, "no matching child"),
            KernelError::ConsistencyViolation { detail } => {
                write!(f, "consistency violation: {detail}")
            }
            KernelError::TooManyOpenFiles => write!(f, "too many open files"),
            KernelError::BadFileDescriptor { fd } => write!(f, "bad file descriptor: {fd}"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::NotSupported { operation } => {
                write!(f, "not supported: {operation}")
            }
            KernelError::Timeout => write!(f, "operation timed out"),
            KernelError::HardwareFault { device } => write!(f, "hardware fault: {device}"),
        }
    }
}

/// Map a [`KernelError`] to the POSIX-style negative errno the syscall ABI
/// returns to user space. This is the single narrowing point called out in
/// the error-handling design; nowhere else in the kernel should construct a
/// raw errno integer.
pub fn to_errno(err: KernelError) -> isize {
    const ENOENT: isize = 2;
    const ESRCH: isize = 3;
    const EIO: isize = 5;
    const EBADF: isize = 9;
    const ECHILD: isize = 10;
    const ENOMEM: isize = 12;
    const EFAULT: isize = 14;
    const EINVAL: isize = 22;
    const EMFILE: isize = 24;
    const ETIMEDOUT: isize = 110;
    const ENOSYS: isize = 38;
    const EAGAIN: isize = 11;

    let code = match err {
        KernelError::OutOfMemory { .. } | KernelError::ResourceExhausted { .. } => ENOMEM,
        KernelError::NoFreeTask => EAGAIN,
        KernelError::Unaligned { .. }
        | KernelError::InvalidAddress { .. }
        | KernelError::InvalidArgument { .. } => EINVAL,
        KernelError::Unmapped { .. } => EFAULT,
        KernelError::DoubleFree { .. } | KernelError::FrameProtected { .. } => EINVAL,
        KernelError::InvalidState { .. } | KernelError::ConsistencyViolation { .. } => EIO,
        KernelError::NoSuchProcess { .. } => ESRCH,
        KernelError::NoSuchChild => ECHILD,
        KernelError::TooManyOpenFiles => EMFILE,
        KernelError::BadFileDescriptor { .. } => EBADF,
        KernelError::NotFound => ENOENT,
        KernelError::NotSupported { .. } => ENOSYS,
        KernelError::Timeout => ETIMEDOUT,
        KernelError::HardwareFault { .. } => EIO,
    };
    -code
}

pub type KResult<T> = core::result::Result<T, KernelError>;
