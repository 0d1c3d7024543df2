//! Legacy dual-8259 PIC, remapped off the CPU exception vector range.
//!
//! Master and slave are remapped to 0x20 and 0x28 respectively so their IRQ
//! vectors never collide with the 0..=31 CPU exception range. Everything is
//! masked until [`crate::irq::irq_register`] unmasks a specific line.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 0x20;
pub const PIC2_OFFSET: u8 = 0x28;

static PICS: Mutex<ChainedPics> =
    // SAFETY: offsets fall entirely outside the CPU exception range 0..32,
    // and master/slave never overlap.
    unsafe { Mutex::new(ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET)) };

/// Remap both PICs and mask every line. Interrupts stay globally disabled
/// until the caller enables them.
pub fn init() {
    // SAFETY: the chained-PIC ICW sequence this crate issues is the
    // well-defined 8259 initialization protocol for I/O ports 0x20/0x21 and
    // 0xA0/0xA1.
    unsafe {
        PICS.lock().initialize();
        PICS.lock().write_masks(0xFF, 0xFF);
    }
}

/// Unmask a single IRQ line (0..=15).
pub fn unmask(line: u8) {
    let mut masks = current_masks();
    if line < 8 {
        masks.0 &= !(1 << line);
    } else {
        masks.1 &= !(1 << (line - 8));
    }
    // SAFETY: writing the mask register only affects which lines are
    // delivered; it does not change the remap offsets.
    unsafe { PICS.lock().write_masks(masks.0, masks.1) };
}

/// Mask a single IRQ line (0..=15).
pub fn mask(line: u8) {
    let mut masks = current_masks();
    if line < 8 {
        masks.0 |= 1 << line;
    } else {
        masks.1 |= 1 << (line - 8);
    }
    // SAFETY: see `unmask`.
    unsafe { PICS.lock().write_masks(masks.0, masks.1) };
}

fn current_masks() -> (u8, u8) {
    // SAFETY: reading the PIC data ports has no side effects beyond the
    // read itself.
    unsafe {
        (
            crate::arch::x86_64::inb(0x21),
            crate::arch::x86_64::inb(0xA1),
        )
    }
}

/// Send end-of-interrupt for the given vector. Notifies the slave PIC first
/// if the vector came from it.
pub fn send_eoi(vector: u8) {
    // SAFETY: `notify_end_of_interrupt` only issues the documented EOI
    // command byte(s) to the command port(s).
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}

/// True if `vector` falls in either PIC's remapped range.
pub fn handles_vector(vector: u8) -> bool {
    (PIC1_OFFSET..PIC1_OFFSET + 16).contains(&vector)
}
