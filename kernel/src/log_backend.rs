//! `log` facade backend, writing formatted records to the architecture
//! serial port.
//!
//! Installed once by [`init`] during early boot, before `mmu_init` --
//! logging must work while debugging the memory manager itself.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::serial::SerialPort;

struct KernelLogger {
    port: Mutex<Option<SerialPort>>,
}

static LOGGER: KernelLogger = KernelLogger {
    port: Mutex::new(None),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut guard = self.port.lock();
        if let Some(port) = guard.as_mut() {
            let _ = write!(
                port,
                "[{:>5} {}] {}\n",
                level_tag(record.level()),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install the kernel's `log::Log` backend and set the default max level.
///
/// # Panics
/// Panics if called more than once (double-init is a programming error,
/// same as the HAL init surface).
pub fn init(port: SerialPort) {
    *LOGGER.port.lock() = Some(port);
    log::set_logger(&LOGGER).expect("log backend already installed");
    let default_level = if cfg!(debug_assertions) {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    log::set_max_level(default_level);
}
