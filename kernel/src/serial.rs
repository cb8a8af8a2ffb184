//! Minimal per-architecture serial port used as the `log` backend's sink.
//!
//! The wire-level detail of the console drivers named in spec.md (VGA text
//! cursor/ANSI parsing, PL011 register layout, serial hex dumps) is out of
//! scope for this crate; this module only needs enough of a UART to carry
//! `log` records off the board.

use core::fmt;

pub struct SerialPort {
    #[cfg(target_arch = "x86_64")]
    inner: uart_16550::SerialPort,
    #[cfg(target_arch = "x86")]
    inner: uart_16550::SerialPort,
    #[cfg(target_arch = "aarch64")]
    inner: Pl011,
}

impl SerialPort {
    /// # Safety
    /// `base` must be the correct, exclusively-owned MMIO/port-IO base for
    /// the UART on this board.
    pub unsafe fn new(base: u16) -> Self {
        #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
        {
            // SAFETY: caller guarantees `base` is the UART's I/O port base.
            let mut inner = unsafe { uart_16550::SerialPort::new(base) };
            inner.init();
            Self { inner }
        }
        #[cfg(target_arch = "aarch64")]
        {
            let _ = base;
            Self {
                inner: Pl011::new(0x0900_0000),
            }
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_str(s)
    }
}

/// Bare-bones PL011 register interface: data register only. QEMU's `virt`
/// machine leaves the UART pre-initialized by firmware, so no setup
/// sequence is needed beyond writing bytes.
#[cfg(target_arch = "aarch64")]
struct Pl011 {
    base: usize,
}

#[cfg(target_arch = "aarch64")]
impl Pl011 {
    const fn new(base: usize) -> Self {
        Self { base }
    }
}

#[cfg(target_arch = "aarch64")]
impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use crate::hal;
        for byte in s.bytes() {
            // SAFETY: `base` is the fixed PL011 MMIO base for this board;
            // writes to the data register (offset 0) are always valid.
            unsafe {
                hal::mmio::write32(self.base as u64, byte as u32);
            }
        }
        Ok(())
    }
}
