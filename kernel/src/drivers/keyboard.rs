//! PS/2 keyboard driver (spec.md 1's representative-drivers list).
//!
//! spec.md 9 notes two keyboard drivers exist in the source this was
//! drawn from -- a lock-free ring buffer and a spinlock-protected one --
//! and calls the spinlock variant normative "for concurrency
//! correctness" (a lock-free SPSC ring is only actually safe with
//! exactly one producer and one consumer; this kernel's IRQ handler is
//! the producer and an arbitrary task-context reader is the consumer,
//! which is the SPSC contract in practice, but the spinlock version
//! costs nothing on a single-CPU kernel and removes any doubt). Only
//! that variant is implemented here.

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod ps2 {
    use pc_keyboard::layouts::Us104Key;
    use pc_keyboard::{DecodedKey, HandleControl, Keyboard, ScancodeSet1};
    use spin::Mutex;

    const RING_CAPACITY: usize = 128;

    struct Ring {
        buf: [u8; RING_CAPACITY],
        head: usize,
        tail: usize,
        len: usize,
    }

    impl Ring {
        const fn new() -> Self {
            Self {
                buf: [0; RING_CAPACITY],
                head: 0,
                tail: 0,
                len: 0,
            }
        }

        fn push(&mut self, byte: u8) {
            if self.len == RING_CAPACITY {
                // Drop the oldest byte rather than the newest -- a slow
                // reader should see a gap, not lose the keypress that
                // woke it.
                self.head = (self.head + 1) % RING_CAPACITY;
                self.len -= 1;
            }
            self.buf[self.tail] = byte;
            self.tail = (self.tail + 1) % RING_CAPACITY;
            self.len += 1;
        }

        fn pop(&mut self) -> Option<u8> {
            if self.len == 0 {
                return None;
            }
            let byte = self.buf[self.head];
            self.head = (self.head + 1) % RING_CAPACITY;
            self.len -= 1;
            Some(byte)
        }
    }

    static RING: Mutex<Ring> = Mutex::new(Ring::new());
    static DECODER: Mutex<Option<Keyboard<Us104Key, ScancodeSet1>>> = Mutex::new(None);

    pub fn init() {
        *DECODER.lock() = Some(Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore));
    }

    /// Called from the keyboard IRQ handler with the raw scancode byte
    /// read from the PS/2 data port. Decodes it and, on a printable
    /// key-down event, pushes the ASCII byte into the ring buffer.
    pub fn on_scancode(scancode: u8) {
        let Some(key) = DECODER.lock().as_mut().and_then(|kb| {
            kb.add_byte(scancode).ok().flatten().and_then(|ev| kb.process_keyevent(ev))
        }) else {
            return;
        };
        if let DecodedKey::Unicode(c) = key {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                RING.lock().push(*byte);
            }
        }
    }

    /// Non-blocking read: drains whatever is already buffered, up to
    /// `buf.len()` bytes. Callers that want blocking semantics loop this
    /// with `task_yield` between polls (spec.md 9's suspension-point
    /// rule: only `task_yield`/`task_sleep` ever suspend).
    pub fn read(buf: &mut [u8]) -> usize {
        let mut ring = RING.lock();
        let mut n = 0;
        while n < buf.len() {
            match ring.pop() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use ps2::{init, on_scancode, read};

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn init() {}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn read(_buf: &mut [u8]) -> usize {
    0
}
