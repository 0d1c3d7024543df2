//! The BSOD: the single terminal error path for both Rust-level panics and
//! CPU exceptions taken in kernel mode.
//!
//! Disables interrupts, forces the VGA console into a fixed color scheme,
//! renders a banner/error-code/message/register-dump/stack-trace, then
//! waits for a keypress before resetting the keyboard controller (and
//! falling back to a triple fault if that doesn't take).

use core::fmt::{self, Write};

use crate::arch::x86_64::vga::{self, Color};

const MAX_STACK_FRAMES: usize = 10;
const KERNEL_VIRT_BASE: u64 = 0xFFFF_8000_0000_0000;
const BSOD_FG: Color = Color::White;
const BSOD_BG: Color = Color::Blue;

/// Register/context snapshot taken at CPU-exception entry.
pub struct ExceptionContext {
    pub vector: u8,
    pub error_code: u64,
    pub name: &'static str,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
    pub rbp: u64,
}

/// A tiny fixed-capacity string buffer so the BSOD path never touches the
/// heap (which may itself be the thing that's corrupted).
struct LineBuf {
    bytes: [u8; 120],
    len: usize,
}

impl LineBuf {
    fn new() -> Self {
        Self { bytes: [0; 120], len: 0 }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if self.len >= self.bytes.len() {
                break;
            }
            self.bytes[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

/// Entry point for a CPU exception taken in kernel mode.
pub fn panic_from_exception(ctx: ExceptionContext) -> ! {
    render(Some(&ctx), format_args!("unhandled exception"))
}

/// Entry point for a Rust-level panic (installed as `#[panic_handler]`).
pub fn bsod(args: fmt::Arguments) -> ! {
    render(None, args)
}

fn render(ctx: Option<&ExceptionContext>, message: fmt::Arguments) -> ! {
    x86_64::instructions::interrupts::disable();

    // SAFETY: interrupts are disabled and this is the terminal code path;
    // nothing else touches the VGA buffer concurrently.
    unsafe {
        vga::bsod_clear(BSOD_BG);

        let mut row = 0;
        vga::bsod_write_line(row, "*** KERNEL PANIC ***", BSOD_FG, BSOD_BG);
        row += 2;

        let mut line = LineBuf::new();
        match ctx {
            Some(c) => {
                let _ = write!(line, "Error Code: 0x{:08x}  ({})", c.error_code, c.name);
            }
            None => {
                let _ = write!(line, "Error Code: (software panic)");
            }
        }
        vga::bsod_write_line(row, line.as_str(), BSOD_FG, BSOD_BG);
        row += 1;

        let mut line = LineBuf::new();
        let _ = write!(line, "{}", message);
        vga::bsod_write_line(row, line.as_str(), BSOD_FG, BSOD_BG);
        row += 2;

        if let Some(c) = ctx {
            let mut line = LineBuf::new();
            let _ = write!(line, "RIP={:016x} RSP={:016x}", c.rip, c.rsp);
            vga::bsod_write_line(row, line.as_str(), BSOD_FG, BSOD_BG);
            row += 1;

            let mut line = LineBuf::new();
            let _ = write!(line, "RBP={:016x} RFLAGS={:016x}", c.rbp, c.rflags);
            vga::bsod_write_line(row, line.as_str(), BSOD_FG, BSOD_BG);
            row += 2;
        }

        vga::bsod_write_line(row, "Stack trace:", BSOD_FG, BSOD_BG);
        row += 1;

        let start_rbp = ctx.map(|c| c.rbp).unwrap_or_else(current_rbp);
        row = stack_trace(start_rbp, row);

        let _ = row;

        log::error!(
            "BSOD: {} ({})",
            message,
            ctx.map(|c| c.name).unwrap_or("panic")
        );
    }

    wait_for_keypress();
    keyboard_controller_reset();
}

/// Read the caller's current RBP. Used when there is no exception context
/// (a plain Rust panic) to start the stack walk from wherever `bsod` itself
/// was called.
fn current_rbp() -> u64 {
    let rbp: u64;
    // SAFETY: reads a general-purpose register, no memory access.
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    rbp
}

/// Walk the RBP frame-pointer chain, rendering one line per frame, up to
/// `MAX_STACK_FRAMES`. Stops on a frame below the kernel virtual base, a
/// zero return address, or the depth limit. Returns the next free row.
///
/// # Safety
///
/// Caller holds the BSOD invariant: interrupts disabled, sole owner of the
/// VGA buffer.
unsafe fn stack_trace(mut rbp: u64, mut row: usize) -> usize {
    for _ in 0..MAX_STACK_FRAMES {
        if rbp < KERNEL_VIRT_BASE || rbp == 0 || row >= vga::BUFFER_HEIGHT {
            break;
        }
        // SAFETY: `rbp` was validated above to lie in the kernel's virtual
        // range; a corrupted chain can still fault here, which is an
        // acceptable outcome for a path that only runs after a fatal error.
        let return_addr = core::ptr::read_volatile((rbp + 8) as *const u64);
        if return_addr == 0 {
            break;
        }
        let mut line = LineBuf::new();
        let _ = write!(line, "  #{} ret=0x{:016x}", row, return_addr);
        vga::bsod_write_line(row, line.as_str(), BSOD_FG, BSOD_BG);
        row += 1;

        rbp = core::ptr::read_volatile(rbp as *const u64);
    }
    row
}

/// Flush any buffered scancode, then poll the PS/2 status port directly
/// (interrupts are disabled, so the normal IRQ1 path can't run) until a key
/// is pressed.
fn wait_for_keypress() {
    loop {
        // SAFETY: reading ports 0x60/0x64 has no side effects beyond the
        // read; this is the standard PS/2 status/data port pair.
        let status = unsafe { crate::arch::x86_64::inb(0x64) };
        if status & 0x1 == 0 {
            break;
        }
        unsafe { crate::arch::x86_64::inb(0x60) };
    }
    loop {
        let status = unsafe { crate::arch::x86_64::inb(0x64) };
        if status & 0x1 != 0 {
            unsafe { crate::arch::x86_64::inb(0x60) };
            break;
        }
        core::hint::spin_loop();
    }
}

/// Pulse the keyboard controller's reset line. If the controller doesn't
/// honour it, fall back to a triple fault by loading a null IDT and
/// forcing an interrupt.
fn keyboard_controller_reset() -> ! {
    // SAFETY: writing 0xFE to the PS/2 controller command port (0x64)
    // pulses the CPU reset line per the 8042 controller's documented
    // command set.
    unsafe {
        crate::arch::x86_64::outb(0x64, 0xFE);
    }
    triple_fault();
}

fn triple_fault() -> ! {
    #[repr(C, packed)]
    struct NullIdtr {
        limit: u16,
        base: u64,
    }
    let idtr = NullIdtr { limit: 0, base: 0 };
    // SAFETY: loading a zero-limit IDT and then forcing any interrupt
    // leaves the CPU unable to service it, which triple-faults and resets
    // the machine. This is the documented fallback when the 8042 reset
    // line is unresponsive.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &idtr, options(readonly, nostack));
        core::arch::asm!("int3");
    }
    loop {
        // SAFETY: hlt with interrupts disabled and a broken IDT; this line
        // should be unreachable, but acts as a final backstop.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}
