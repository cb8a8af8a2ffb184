//! UHCI host-controller core (C7): port lifecycle and the control/bulk
//! transfer protocol, per spec.md 4.7.
//!
//! Registers are accessed as classic x86 I/O-space ports -- spec.md
//! calls them "UHCI I/O registers", not MMIO -- via hand-rolled
//! `in`/`out` asm, the same idiom `hal::i686::irq` already uses for the
//! PIC.

use core::arch::asm;

use spin::Mutex;

use crate::error::{KernelError, KResult};
use crate::sched::scheduler;

use super::td_qh::{Pool, Qh, Td, LINK_QH, LINK_TERMINATE};

// UHCI register offsets from the I/O base (BAR4).
const USBCMD: u16 = 0x00;
const USBSTS: u16 = 0x02;
const USBINTR: u16 = 0x04;
const FRNUM: u16 = 0x06;
const FRBASEADD: u16 = 0x08;
const SOFMOD: u16 = 0x0C;
const PORTSC1: u16 = 0x10;
const PORTSC2: u16 = 0x12;

const CMD_RUN: u16 = 1 << 0;
const CMD_HCRESET: u16 = 1 << 1;
const CMD_GRESET: u16 = 1 << 2;
const CMD_CONFIGURE: u16 = 1 << 6;

const STS_INTERRUPT: u16 = 1 << 0;
const STS_HC_HALTED: u16 = 1 << 5;

const PORT_CONNECT_STATUS: u16 = 1 << 0;
const PORT_CONNECT_CHANGE: u16 = 1 << 1;
const PORT_ENABLE: u16 = 1 << 2;
const PORT_RESET: u16 = 1 << 9;
const PORT_LOW_SPEED: u16 = 1 << 8;

/// UHCI's frame list holds one pointer per 1ms frame; 1024 entries give
/// the standard 1024-frame schedule.
const FRAME_LIST_LEN: usize = 1024;

// SAFETY: `port` must be an I/O port this kernel owns exclusively
// (discovered fresh via PCI, never shared with another driver).
unsafe fn outw(port: u16, value: u16) {
    unsafe { asm!("out dx, ax", in("dx") port, in("ax") value) }
}

unsafe fn inw(port: u16) -> u16 {
    let value: u16;
    unsafe { asm!("in ax, dx", in("dx") port, out("ax") value) }
    value
}

unsafe fn outl(port: u16, value: u32) {
    unsafe { asm!("out dx, eax", in("dx") port, in("eax") value) }
}

/// Classification of a completed transfer descriptor's status word,
/// matching the per-TD outcomes spec.md 4.7 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    Stall,
    BufferError,
    Babble,
    NakTimeout,
    BitStuffError,
}

fn classify_status(ctrl_status: u32) -> Option<TransferStatus> {
    if ctrl_status & (1 << 23) != 0 {
        return None; // still active
    }
    if ctrl_status & (1 << 22) != 0 {
        Some(TransferStatus::Babble)
    } else if ctrl_status & (1 << 21) != 0 {
        Some(TransferStatus::NakTimeout)
    } else if ctrl_status & (1 << 20) != 0 {
        Some(TransferStatus::BitStuffError)
    } else if ctrl_status & (1 << 19) != 0 {
        Some(TransferStatus::Stall)
    } else if ctrl_status & (1 << 17) != 0 {
        Some(TransferStatus::BufferError)
    } else {
        Some(TransferStatus::Complete)
    }
}

/// One discovered UHCI controller. `frame_list` is a PMM-backed page of
/// 1024 32-bit link pointers, per the standard UHCI schedule format.
///
/// `interrupt_qh`/`control_qh`/`bulk_qh` are the three persistent class
/// queue heads spec.md 4.7 requires: every one of the 1024 frame-list
/// entries points at `interrupt_qh`, which links to `control_qh`, which
/// links to `bulk_qh`, which terminates. They are allocated once, in
/// `init`, and never freed. A transfer links its own per-transfer TD
/// chain (wrapped in a transient QH, for control transfers) onto the
/// element pointer of whichever class QH it belongs to, and unlinks it
/// again once the transfer completes.
pub struct UhciController {
    io_base: u16,
    frame_list_virt: *mut u32,
    frame_list_phys: u32,
    tds: Mutex<Pool<Td>>,
    qhs: Mutex<Pool<Qh>>,
    /// Per-endpoint data toggle, persisted across bulk transfers
    /// (spec.md 4.7: toggle state survives between calls).
    data_toggle: Mutex<[bool; 16]>,
    interrupt_qh: usize,
    control_qh: usize,
    bulk_qh: usize,
}

// SAFETY: the raw pointer only ever addresses a PMM frame this
// controller owns exclusively; all access goes through `&mut self`
// methods serialized by the caller (this kernel has one HC instance).
unsafe impl Send for UhciController {}
unsafe impl Sync for UhciController {}

impl UhciController {
    fn reg_w(&self, offset: u16, value: u16) {
        // SAFETY: `offset` is one of this controller's own registers.
        unsafe { outw(self.io_base + offset, value) }
    }

    fn reg_r(&self, offset: u16) -> u16 {
        // SAFETY: see `reg_w`.
        unsafe { inw(self.io_base + offset) }
    }

    /// Brings up a freshly discovered controller: global reset, host
    /// controller reset, frame list installed, schedule started.
    pub fn init(io_base: u16) -> KResult<Self> {
        // SAFETY: `io_base` was just read out of this device's own BAR4.
        unsafe {
            outw(io_base + USBCMD, CMD_GRESET);
        }
        for _ in 0..1_000_000 {
            core::hint::spin_loop();
        }
        // SAFETY: see above.
        unsafe {
            outw(io_base + USBCMD, 0);
            outw(io_base + USBCMD, CMD_HCRESET);
        }
        let mut waited = 0;
        loop {
            // SAFETY: see above.
            let cmd = unsafe { inw(io_base + USBCMD) };
            if cmd & CMD_HCRESET == 0 {
                break;
            }
            waited += 1;
            if waited > 1000 {
                return Err(KernelError::HardwareFault { device: "uhci" });
            }
        }

        let pages = (FRAME_LIST_LEN * core::mem::size_of::<u32>())
            .div_ceil(crate::mm::frame::FRAME_SIZE);
        let base = crate::mm::frame::PMM.alloc_frames(pages).ok_or(KernelError::OutOfMemory {
            requested: pages * crate::mm::frame::FRAME_SIZE,
            available: crate::mm::frame::PMM.get_info().free * crate::mm::frame::FRAME_SIZE,
        })?;
        let frame_list_virt = base.to_kernel_virt().as_usize() as *mut u32;

        let mut tds = Pool::<Td>::new()?;
        let mut qhs = Pool::<Qh>::new()?;

        // Build the static interrupt -> control -> bulk queue-head chain
        // (spec.md 4.7): allocated once here and never freed. Built
        // tail-first so each QH's head_link can be filled in before the
        // QH before it is written.
        let bulk_qh = qhs.alloc()?;
        {
            let qh = qhs.get_mut(bulk_qh);
            qh.head_link = LINK_TERMINATE;
            qh.element_link = LINK_TERMINATE;
        }
        let bulk_qh_phys = qhs.get(bulk_qh).phys_addr();

        let control_qh = qhs.alloc()?;
        {
            let qh = qhs.get_mut(control_qh);
            qh.head_link = bulk_qh_phys | LINK_QH;
            qh.element_link = LINK_TERMINATE;
        }
        let control_qh_phys = qhs.get(control_qh).phys_addr();

        let interrupt_qh = qhs.alloc()?;
        {
            let qh = qhs.get_mut(interrupt_qh);
            qh.head_link = control_qh_phys | LINK_QH;
            qh.element_link = LINK_TERMINATE;
        }
        let interrupt_qh_phys = qhs.get(interrupt_qh).phys_addr();

        // Every frame-list entry points at the same interrupt QH, the
        // permanent head of the chain; per-transfer work is threaded onto
        // the element pointer of whichever class QH it belongs to, never
        // onto the frame list itself.
        // SAFETY: `base` names `pages` freshly allocated, exclusively
        // owned, kernel-direct-mapped frames -- large enough for
        // `FRAME_LIST_LEN` u32 entries.
        unsafe {
            for i in 0..FRAME_LIST_LEN {
                frame_list_virt.add(i).write(interrupt_qh_phys | LINK_QH);
            }
        }

        let hc = Self {
            io_base,
            frame_list_virt,
            frame_list_phys: base.as_u64() as u32,
            tds: Mutex::new(tds),
            qhs: Mutex::new(qhs),
            data_toggle: Mutex::new([false; 16]),
            interrupt_qh,
            control_qh,
            bulk_qh,
        };

        // SAFETY: FRBASEADD is a 32-bit register; `io_base` is this
        // controller's own.
        unsafe { outl(io_base + FRBASEADD, hc.frame_list_phys) };
        hc.reg_w(FRNUM, 0);
        hc.reg_w(SOFMOD, 0x40);
        hc.reg_w(USBINTR, 0);
        hc.reg_w(USBCMD, CMD_RUN | CMD_CONFIGURE);

        Ok(hc)
    }

    fn portsc_offset(port: u8) -> u16 {
        if port == 0 {
            PORTSC1
        } else {
            PORTSC2
        }
    }

    /// Runs the standard USB port-reset sequence (assert reset for
    /// >=50ms, clear it, then wait for the enable bit) and reports the
    /// detected device speed. Returns `Ok(None)` if nothing is attached.
    pub fn reset_port(&self, port: u8) -> KResult<Option<bool>> {
        let offset = Self::portsc_offset(port);
        let status = self.reg_r(offset);
        if status & PORT_CONNECT_STATUS == 0 {
            return Ok(None);
        }

        self.reg_w(offset, status | PORT_RESET);
        let deadline = scheduler::ticks() + 6; // ~60ms at a 10ms tick, >= the 50ms spec minimum
        while scheduler::ticks() < deadline {
            scheduler::yield_now();
        }
        let status = self.reg_r(offset);
        self.reg_w(offset, status & !PORT_RESET);

        // Clear connect-status-change (write-1-to-clear) and enable the port.
        let status = self.reg_r(offset);
        self.reg_w(offset, (status | PORT_ENABLE | PORT_CONNECT_CHANGE) & !PORT_RESET);

        let status = self.reg_r(offset);
        let low_speed = status & PORT_LOW_SPEED != 0;
        Ok(Some(low_speed))
    }

    /// Polls every root-hub port for a fresh connect-change event. Meant
    /// to be called periodically (spec.md 4.7's ~500ms polling cadence)
    /// by whatever owns the USB subsystem's background task.
    pub fn poll_connect_changes(&self) -> [bool; 2] {
        let mut changed = [false; 2];
        for (port, slot) in changed.iter_mut().enumerate() {
            let offset = Self::portsc_offset(port as u8);
            let status = self.reg_r(offset);
            if status & PORT_CONNECT_CHANGE != 0 {
                *slot = true;
                self.reg_w(offset, status | PORT_CONNECT_CHANGE);
            }
        }
        changed
    }

    fn build_token(pid: u8, device_address: u8, endpoint: u8, data_toggle: bool, len: usize) -> u32 {
        let max_len = if len == 0 { 0x7FF } else { (len - 1) as u32 };
        (max_len << 21)
            | ((data_toggle as u32) << 19)
            | ((endpoint as u32 & 0xF) << 15)
            | ((device_address as u32 & 0x7F) << 8)
            | pid as u32
    }

    /// Polls a single TD's `ctrl_status` until the hardware clears the
    /// active bit or `deadline` (in scheduler ticks) passes.
    fn poll_td(tds: &Pool<Td>, index: usize, deadline: u64) -> KResult<TransferStatus> {
        loop {
            let ctrl_status = tds.get(index).ctrl_status;
            if let Some(status) = classify_status(ctrl_status) {
                return Ok(status);
            }
            if scheduler::ticks() >= deadline {
                return Err(KernelError::Timeout);
            }
            scheduler::yield_now();
        }
    }

    /// Full control transfer: SETUP, an optional single DATA stage, and a
    /// STATUS stage, per spec.md 4.7. `setup_phys`/`data_phys` are
    /// physical addresses of DMA-capable buffers (frame-backed, per C2).
    ///
    /// All (up to three) TDs are linked into one chain and attached, via
    /// a transient queue head, to the control class QH's element pointer
    /// in a single shot -- the hardware advances through SETUP/DATA/STATUS
    /// on its own, rather than this driver re-submitting between stages.
    pub fn control_transfer(
        &self,
        device_address: u8,
        setup_phys: u32,
        data_phys: u32,
        data_len: usize,
    ) -> KResult<(usize, TransferStatus)> {
        const PID_SETUP: u8 = 0x2D;
        const PID_IN: u8 = 0x69;
        const PID_OUT: u8 = 0xE1;
        const TIMEOUT_TICKS: u64 = 500; // 5s at a 10ms tick

        let mut tds = self.tds.lock();
        let mut qhs = self.qhs.lock();

        let has_data = data_len > 0;
        let setup_idx = tds.alloc()?;
        let data_idx = if has_data { Some(tds.alloc()?) } else { None };
        let status_idx = tds.alloc()?;
        let qh_idx = qhs.alloc()?;

        // Status stage direction is opposite the data stage's (or IN, if
        // there is no data stage); this driver only ever issues IN data
        // stages (descriptor reads), so status is always OUT when data is
        // present.
        let status_pid = if has_data { PID_OUT } else { PID_IN };

        {
            let td = tds.get_mut(status_idx);
            td.link = LINK_TERMINATE;
            td.ctrl_status = (1 << 23) | (3 << 27);
            td.token = Self::build_token(status_pid, device_address, 0, true, 0);
            td.buffer = 0;
        }
        let status_phys = tds.get(status_idx).phys_addr();

        let first_after_setup = if let Some(data_idx) = data_idx {
            {
                let td = tds.get_mut(data_idx);
                td.link = status_phys;
                td.ctrl_status = (1 << 23) | (3 << 27);
                td.token = Self::build_token(PID_IN, device_address, 0, true, data_len);
                td.buffer = data_phys;
            }
            tds.get(data_idx).phys_addr()
        } else {
            status_phys
        };

        {
            let td = tds.get_mut(setup_idx);
            td.link = first_after_setup;
            td.ctrl_status = (1 << 23) | (3 << 27);
            td.token = Self::build_token(PID_SETUP, device_address, 0, false, 8);
            td.buffer = setup_phys;
        }
        let setup_phys_addr = tds.get(setup_idx).phys_addr();

        {
            let qh = qhs.get_mut(qh_idx);
            qh.head_link = LINK_TERMINATE;
            qh.element_link = setup_phys_addr;
        }
        let qh_phys = qhs.get(qh_idx).phys_addr();

        // Insert the chain as the control class QH's element pointer
        // (spec.md 4.7: "per-transfer queue heads are inserted as the
        // element pointer of the relevant class queue head while in
        // flight").
        qhs.get_mut(self.control_qh).element_link = qh_phys | LINK_QH;

        let deadline = scheduler::ticks() + TIMEOUT_TICKS;
        let setup_status = Self::poll_td(&tds, setup_idx, deadline);
        let result = match setup_status {
            Err(err) => Err(err),
            Ok(status) if status != TransferStatus::Complete => Ok((0, status)),
            Ok(_) => {
                if let Some(data_idx) = data_idx {
                    match Self::poll_td(&tds, data_idx, deadline) {
                        Err(err) => Err(err),
                        Ok(status) if status != TransferStatus::Complete => Ok((0, status)),
                        Ok(_) => {
                            let len = ((tds.get(data_idx).ctrl_status & 0x7FF) + 1) as usize & 0x7FF;
                            Self::poll_td(&tds, status_idx, deadline)
                                .map(|status_stage| (len.min(data_len), status_stage))
                        }
                    }
                } else {
                    Self::poll_td(&tds, status_idx, deadline).map(|status_stage| (0, status_stage))
                }
            }
        };

        // Clear the control QH's element pointer and return everything to
        // the free lists (spec.md P11: "the issued TDs and QH are
        // returned to their free lists, and the controller's control-QH
        // element pointer is cleared").
        qhs.get_mut(self.control_qh).element_link = LINK_TERMINATE;
        tds.free(setup_idx);
        if let Some(data_idx) = data_idx {
            tds.free(data_idx);
        }
        tds.free(status_idx);
        qhs.free(qh_idx);

        result
    }

    /// Bulk transfer: a single DATA-stage TD linked directly as the bulk
    /// class QH's element pointer (no transient QH needed for a single
    /// TD), with the endpoint's data toggle persisted across calls
    /// (spec.md 4.7).
    pub fn bulk_transfer(
        &self,
        device_address: u8,
        endpoint: u8,
        pid_in: bool,
        buffer_phys: u32,
        len: usize,
    ) -> KResult<(usize, TransferStatus)> {
        const PID_IN: u8 = 0x69;
        const PID_OUT: u8 = 0xE1;
        const TIMEOUT_TICKS: u64 = 1000; // 10s at a 10ms tick

        let mut tds = self.tds.lock();
        let mut qhs = self.qhs.lock();

        let toggle = {
            let toggles = self.data_toggle.lock();
            toggles[endpoint as usize & 0xF]
        };
        let pid = if pid_in { PID_IN } else { PID_OUT };

        let td_idx = tds.alloc()?;
        {
            let td = tds.get_mut(td_idx);
            td.link = LINK_TERMINATE;
            td.ctrl_status = (1 << 23) | (3 << 27);
            td.token = Self::build_token(pid, device_address, endpoint, toggle, len);
            td.buffer = buffer_phys;
        }
        let td_phys = tds.get(td_idx).phys_addr();

        qhs.get_mut(self.bulk_qh).element_link = td_phys;

        let deadline = scheduler::ticks() + TIMEOUT_TICKS;
        let outcome = Self::poll_td(&tds, td_idx, deadline);

        qhs.get_mut(self.bulk_qh).element_link = LINK_TERMINATE;

        let status = outcome?;
        let actual_length = if status == TransferStatus::Complete {
            ((tds.get(td_idx).ctrl_status & 0x7FF) + 1) as usize & 0x7FF
        } else {
            0
        };
        tds.free(td_idx);

        if status == TransferStatus::Complete {
            let mut toggles = self.data_toggle.lock();
            toggles[endpoint as usize & 0xF] = !toggle;
        }
        Ok((actual_length.min(len), status))
    }

    pub fn is_halted(&self) -> bool {
        self.reg_r(USBSTS) & STS_HC_HALTED != 0
    }

    pub fn acknowledge_interrupt(&self) {
        self.reg_w(USBSTS, STS_INTERRUPT);
    }
}
