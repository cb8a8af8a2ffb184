//! USB host-controller core (C7): UHCI discovery, port lifecycle, and
//! the control/bulk transfer protocol, per spec.md 4.7. No class
//! drivers live here -- only what every device needs before a class
//! driver could attach.

pub mod device;
pub mod host;
pub mod pci;
pub mod td_qh;

use alloc::vec::Vec;

use spin::Once;

use self::device::DeviceList;
use self::host::UhciController;

static CONTROLLER: Once<UhciController> = Once::new();
static DEVICES: DeviceList = DeviceList::new();

/// Scans PCI for a UHCI controller, brings it up, and performs the
/// initial root-hub scan (spec.md scenario 6: "after `uhci_init`
/// exactly one controller is registered"). A platform with no UHCI
/// hardware (e.g. most aarch64 boards) leaves `CONTROLLER` unset; every
/// other entry point in this module is then simply a no-op.
pub fn init() {
    let Some(location) = pci::find_uhci() else {
        return;
    };
    match UhciController::init(location.io_base) {
        Ok(hc) => {
            let hc = CONTROLLER.call_once(|| hc);
            scan_ports(hc);
        }
        Err(_) => {
            // Hardware present but failed to reset; leave CONTROLLER
            // unset rather than publish a half-initialized controller.
        }
    }
}

fn scan_ports(hc: &UhciController) {
    for port in 0..2u8 {
        if let Ok(Some(low_speed)) = hc.reset_port(port) {
            let _ = device::enumerate(hc, &DEVICES, port, low_speed);
        }
    }
}

/// Called periodically (spec.md 4.7's ~500ms cadence) to notice newly
/// attached devices and enumerate them.
pub fn poll() {
    let Some(hc) = CONTROLLER.get() else {
        return;
    };
    for (port, changed) in hc.poll_connect_changes().iter().enumerate() {
        if *changed {
            if let Ok(Some(low_speed)) = hc.reset_port(port as u8) {
                let _ = device::enumerate(hc, &DEVICES, port as u8, low_speed);
            }
        }
    }
}

pub fn devices() -> Vec<device::Device> {
    DEVICES.devices()
}
