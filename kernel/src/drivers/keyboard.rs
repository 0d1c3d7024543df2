//! PS/2 keyboard driver.
//!
//! Reads scancodes from I/O port 0x60, decodes them via the `pc_keyboard`
//! crate (ScancodeSet1, US 104-key layout, handling the shift/ctrl/alt and
//! 0xE0 extended-prefix state internally), and pushes decoded ASCII bytes to
//! a 256-byte ring buffer. Runs from IRQ1; the shell drains the buffer from
//! its polling loop via [`getchar`].

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

const KEY_BUFFER_SIZE: usize = 256;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct KeyBuffer {
    buf: [u8; KEY_BUFFER_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl KeyBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; KEY_BUFFER_SIZE],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn push(&mut self, byte: u8) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & (KEY_BUFFER_SIZE - 1);
        let tail = self.tail.load(Ordering::Acquire);
        if next == tail {
            return;
        }
        self.buf[head] = byte;
        self.head.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let byte = self.buf[tail];
        self.tail.store((tail + 1) & (KEY_BUFFER_SIZE - 1), Ordering::Release);
        Some(byte)
    }

    fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }
}

// SAFETY: push is called only from IRQ1 (single producer); pop/is_empty are
// called only from the shell's polling loop (single consumer). Head/tail are
// atomics with acquire/release pairing, so the two sides never race.
unsafe impl Send for KeyBuffer {}
unsafe impl Sync for KeyBuffer {}

static mut KEY_BUFFER: KeyBuffer = KeyBuffer::new();

static KEYBOARD: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn init() {
    let kb = Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::MapLettersToUnicode);
    *KEYBOARD.lock() = Some(kb);
    INITIALIZED.store(true, Ordering::Release);
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Read one scancode byte from the data port and feed it through the
/// decoder. Called from the IRQ1 handler.
pub fn handle_irq() {
    // SAFETY: 0x60 is the standard PS/2 data port; reading it is how the
    // controller clears IRQ1.
    let scancode = unsafe { crate::arch::x86_64::inb(0x60) };

    let mut guard = KEYBOARD.lock();
    let Some(keyboard) = guard.as_mut() else { return };
    let Ok(Some(event)) = keyboard.add_byte(scancode) else { return };
    let Some(key) = keyboard.process_keyevent(event) else { return };

    if let DecodedKey::Unicode(ch) = key {
        if ch.is_ascii() {
            // SAFETY: sole producer, see KeyBuffer's Send/Sync justification.
            #[allow(static_mut_refs)]
            unsafe {
                KEY_BUFFER.push(ch as u8);
            }
        }
    }
}

/// Pop one decoded byte, or `None` if the buffer is empty. Non-blocking.
pub fn getchar() -> Option<u8> {
    // SAFETY: sole consumer, see KeyBuffer's Send/Sync justification.
    #[allow(static_mut_refs)]
    unsafe {
        KEY_BUFFER.pop()
    }
}

/// True if a decoded byte is waiting to be read.
pub fn available() -> bool {
    // SAFETY: sole consumer.
    #[allow(static_mut_refs)]
    unsafe {
        !KEY_BUFFER.is_empty()
    }
}
