//! Early boot output, before the `log` backend is installed.
//!
//! `log::info!`/`warn!`/etc. are the normal logging path everywhere else;
//! these macros exist only for the handful of lines that execute before
//! [`crate::log_backend::init`] has a serial port to write to.

use core::fmt::Write;

use spin::Mutex;

use crate::serial::SerialPort;

pub static EARLY_PORT: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Installs the port `print!`/`println!` write through. Callers needing
/// output before [`crate::log_backend::init`] runs (or the no_std test
/// binaries under `kernel/tests/`, which have no `log` backend at all)
/// call this first; `print!` is silently a no-op until they do.
pub fn install(port: SerialPort) {
    *EARLY_PORT.lock() = Some(port);
}

pub fn _print(args: core::fmt::Arguments) {
    if let Some(port) = EARLY_PORT.lock().as_mut() {
        let _ = port.write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
