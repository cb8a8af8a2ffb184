//! `/dev/console` registration point.
//!
//! The actual leaf rendering this would sit on top of -- VGA text-mode
//! cursor handling, the PL011 UART register layout, ANSI escape parsing
//! -- is explicitly out of scope (spec.md 1's Non-goals). What remains
//! is the write sink ([`crate::print`], already wired through
//! [`crate::fs::file::OpenFile::Console`]) and the read source
//! ([`crate::drivers::keyboard`]); there is no separate init step here,
//! this module exists so `/dev/console` has a named home in `drivers`
//! rather than being folded invisibly into `fs`.
