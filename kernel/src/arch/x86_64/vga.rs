//! VGA text-mode console: the 80x25 cell buffer at 0xb8000, the CRTC cursor
//! ports, and the BSOD renderer used by the panic path.

use core::{fmt, ptr::write_volatile};

use lazy_static::lazy_static;
use spin::Mutex;

/// VGA text-mode color palette. Not all variants are used but the full
/// 16-color palette is defined per the VGA specification.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

pub const BUFFER_HEIGHT: usize = 25;
pub const BUFFER_WIDTH: usize = 80;

const VGA_PHYS_ADDR: usize = 0xb8000;

#[repr(transparent)]
struct Buffer {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    column_position: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = BUFFER_HEIGHT - 1;
                let col = self.column_position;

                let color_code = self.color_code;
                // SAFETY: the VGA buffer at 0xb8000 is memory-mapped I/O;
                // write_volatile ensures the store isn't optimized away.
                // Row/col stay in bounds via the overflow check above.
                unsafe {
                    write_volatile(
                        &mut self.buffer.chars[row][col],
                        ScreenChar {
                            ascii_character: byte,
                            color_code,
                        },
                    );
                }
                self.column_position += 1;
                set_cursor(row, self.column_position.min(BUFFER_WIDTH - 1));
            }
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                // SAFETY: read/write_volatile stay within the fixed
                // BUFFER_HEIGHT x BUFFER_WIDTH bounds of the VGA buffer.
                let character = unsafe { core::ptr::read_volatile(&self.buffer.chars[row][col]) };
                unsafe {
                    write_volatile(&mut self.buffer.chars[row - 1][col], character);
                }
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.column_position = 0;
        set_cursor(BUFFER_HEIGHT - 1, 0);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            // SAFETY: write_volatile to the VGA buffer; row/col are
            // caller-bounded to BUFFER_HEIGHT/BUFFER_WIDTH.
            unsafe {
                write_volatile(&mut self.buffer.chars[row][col], blank);
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
    }

    pub fn set_color(&mut self, fg: Color, bg: Color) {
        self.color_code = ColorCode::new(fg, bg);
    }

    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.column_position = 0;
        set_cursor(0, 0);
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        column_position: 0,
        color_code: ColorCode::new(Color::White, Color::Black),
        // SAFETY: 0xb8000 is the well-known physical address of the VGA
        // text buffer, identity-mapped in kernel space; it has static
        // lifetime and is protected by the enclosing Mutex.
        buffer: unsafe { &mut *(VGA_PHYS_ADDR as *mut Buffer) },
    });
}

/// Position the hardware cursor via the CRTC index/data port pair
/// (0x3D4/0x3D5), registers 0x0E (cursor location high) and 0x0F (low).
pub fn set_cursor(row: usize, col: usize) {
    let pos = (row * BUFFER_WIDTH + col) as u16;
    // SAFETY: 0x3D4/0x3D5 are the standard CRTC index/data ports; writing
    // the documented cursor-location registers has no effect beyond moving
    // the blinking cursor glyph.
    unsafe {
        crate::arch::x86_64::outb(0x3D4, 0x0E);
        crate::arch::x86_64::outb(0x3D5, (pos >> 8) as u8);
        crate::arch::x86_64::outb(0x3D4, 0x0F);
        crate::arch::x86_64::outb(0x3D5, (pos & 0xFF) as u8);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        WRITER.lock().write_fmt(args).expect("VGA write_fmt failed");
    });
}

/// Direct, lock-bypassing full-screen writer for the panic/BSOD path. The
/// normal `WRITER` mutex may already be held by whatever was running when
/// the fault occurred; the BSOD must render regardless.
///
/// # Safety
///
/// Caller must ensure interrupts are disabled and no other code is
/// concurrently touching the VGA buffer (true on the panic path: this is
/// the last thing the kernel ever does).
pub unsafe fn bsod_clear(bg: Color) {
    let blank = ScreenChar {
        ascii_character: b' ',
        color_code: ColorCode::new(Color::White, bg),
    };
    let buffer = &mut *(VGA_PHYS_ADDR as *mut Buffer);
    for row in 0..BUFFER_HEIGHT {
        for col in 0..BUFFER_WIDTH {
            write_volatile(&mut buffer.chars[row][col], blank);
        }
    }
}

/// Write one line of the BSOD screen at a fixed row, left-aligned,
/// truncated to `BUFFER_WIDTH`.
///
/// # Safety
///
/// Same requirements as [`bsod_clear`].
pub unsafe fn bsod_write_line(row: usize, s: &str, fg: Color, bg: Color) {
    if row >= BUFFER_HEIGHT {
        return;
    }
    let color_code = ColorCode::new(fg, bg);
    let buffer = &mut *(VGA_PHYS_ADDR as *mut Buffer);
    for (col, byte) in s.bytes().take(BUFFER_WIDTH).enumerate() {
        let glyph = match byte {
            0x20..=0x7e => byte,
            _ => 0xfe,
        };
        write_volatile(
            &mut buffer.chars[row][col],
            ScreenChar {
                ascii_character: glyph,
                color_code,
            },
        );
    }
}
