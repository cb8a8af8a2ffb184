//! Generic USB device enumeration (spec.md scenario 6): issue
//! GET_DESCRIPTOR(DEVICE, 8), assign address 1, and record the device.
//! No class drivers (HID, mass storage, ...) are in scope -- only the
//! handshake every device goes through before a class driver could
//! attach.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::mm::frame::{FRAME_SIZE, PMM};

use super::host::UhciController;

const GET_DESCRIPTOR: u8 = 0x06;
const SET_ADDRESS: u8 = 0x05;
const DESCRIPTOR_TYPE_DEVICE: u16 = 0x01;

/// The first 8 bytes of a standard device descriptor: enough to learn
/// `bMaxPacketSize0` before requesting the rest (the classic two-stage
/// USB enumeration dance). This driver only ever needs the 8-byte
/// prefix, so it never requests the remaining 10 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceDescriptorPrefix {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
}

impl DeviceDescriptorPrefix {
    fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            length: bytes[0],
            descriptor_type: bytes[1],
            usb_version: u16::from_le_bytes([bytes[2], bytes[3]]),
            device_class: bytes[4],
            device_subclass: bytes[5],
            device_protocol: bytes[6],
            max_packet_size0: bytes[7],
        }
    }
}

/// A device this host controller has enumerated.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub port: u8,
    pub address: u8,
    pub low_speed: bool,
    pub descriptor: DeviceDescriptorPrefix,
}

/// The host controller's enumerated-device list. A real stack would key
/// this by port across connect/disconnect churn; this kernel enumerates
/// once per connect event and never re-addresses a live device.
pub struct DeviceList {
    devices: Mutex<Vec<Device>>,
}

impl DeviceList {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.lock().clone()
    }
}

impl Default for DeviceList {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an 8-byte GET_DESCRIPTOR(DEVICE) setup packet, per the
/// standard USB control-request layout.
fn build_get_descriptor_setup(buf: &mut [u8; 8]) {
    buf[0] = 0x80; // bmRequestType: device-to-host, standard, device
    buf[1] = GET_DESCRIPTOR;
    buf[2] = 0; // wValue low: descriptor index 0
    buf[3] = DESCRIPTOR_TYPE_DEVICE as u8; // wValue high: descriptor type
    buf[4] = 0;
    buf[5] = 0; // wIndex
    buf[6] = 8;
    buf[7] = 0; // wLength = 8
}

fn build_set_address_setup(buf: &mut [u8; 8], address: u8) {
    buf[0] = 0x00; // bmRequestType: host-to-device, standard, device
    buf[1] = SET_ADDRESS;
    buf[2] = address;
    buf[3] = 0;
    buf[4] = 0;
    buf[5] = 0; // wIndex
    buf[6] = 0;
    buf[7] = 0; // wLength = 0
}

/// Runs the enumerate-one-device sequence against whatever is attached
/// at `port` on `hc`: reads the first 8 bytes of its device descriptor,
/// then assigns it address 1 (spec.md scenario 6: "the device appears
/// in the HC's device list at port == 0, address == 1").
pub fn enumerate(hc: &UhciController, list: &DeviceList, port: u8, low_speed: bool) -> KResult<Device> {
    const DEFAULT_ADDRESS: u8 = 0;
    const ASSIGNED_ADDRESS: u8 = 1;

    let dma = PMM.alloc_frames(1).ok_or(KernelError::OutOfMemory {
        requested: FRAME_SIZE,
        available: PMM.get_info().free * FRAME_SIZE,
    })?;
    let dma_virt = dma.to_kernel_virt().as_usize() as *mut u8;
    let setup_phys = dma.as_u64() as u32;
    let data_phys = setup_phys + 8;

    let mut setup = [0u8; 8];
    build_get_descriptor_setup(&mut setup);
    // SAFETY: `dma_virt` names a freshly allocated, exclusively owned,
    // kernel-direct-mapped frame at least one page long.
    unsafe {
        core::ptr::copy_nonoverlapping(setup.as_ptr(), dma_virt, 8);
    }

    let (actual_length, status) =
        hc.control_transfer(DEFAULT_ADDRESS, setup_phys, data_phys, 8)?;
    if status != super::host::TransferStatus::Complete || actual_length != 8 {
        let _ = PMM.free_frame(dma);
        return Err(KernelError::HardwareFault { device: "usb device" });
    }

    let mut raw = [0u8; 8];
    // SAFETY: see above; the controller wrote exactly `actual_length`
    // bytes into the data-stage buffer at `data_phys`.
    unsafe {
        core::ptr::copy_nonoverlapping(dma_virt.add(8), raw.as_mut_ptr(), 8);
    }
    let descriptor = DeviceDescriptorPrefix::from_bytes(&raw);

    build_set_address_setup(&mut setup, ASSIGNED_ADDRESS);
    // SAFETY: see above.
    unsafe {
        core::ptr::copy_nonoverlapping(setup.as_ptr(), dma_virt, 8);
    }
    let (_, status) = hc.control_transfer(DEFAULT_ADDRESS, setup_phys, 0, 0)?;
    let _ = PMM.free_frame(dma);
    if status != super::host::TransferStatus::Complete {
        return Err(KernelError::HardwareFault { device: "usb device" });
    }

    let device = Device {
        port,
        address: ASSIGNED_ADDRESS,
        low_speed,
        descriptor,
    };
    list.devices.lock().push(device);
    Ok(device)
}
