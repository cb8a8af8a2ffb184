//! Representative device drivers (spec.md 1): the PS/2 keyboard, a
//! console sink, and the UHCI USB host-controller core. Leaf console
//! drivers (VGA text mode, PL011 register layout, ANSI parsing), the RTC
//! driver, and EDID parsing are explicitly out of scope (spec.md 1's
//! Non-goals) -- `console` here is the minimal byte sink `/dev/console`
//! needs, nothing more.

pub mod console;
pub mod keyboard;
pub mod usb;

/// Brings up every driver this build has hardware for. Called once from
/// `bootstrap` after the scheduler is initialized (spec.md 2's boot data
/// flow: "drivers (incl. C7) registered" comes after C4/C5, before the
/// first user task is loaded).
pub fn init() {
    keyboard::init();
    if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        usb::init();
    }
}
