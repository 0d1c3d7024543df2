//! Hardware interrupt line registration.
//!
//! A fixed 16-slot table (one per legacy PIC line) mapping IRQ lines to
//! handler functions. The IDT's per-vector trampolines call [`dispatch`]
//! after the CPU delivers the interrupt; EOI is sent by the trampoline, not
//! here.

use crate::arch::x86_64::pic;
use crate::error::{FsError, KernelError, KernelResult};
use crate::sync::IrqSpinlock;

pub type IrqHandler = fn();

const MAX_LINES: usize = 16;

static HANDLERS: IrqSpinlock<[Option<IrqHandler>; MAX_LINES]> = IrqSpinlock::new([None; MAX_LINES]);

/// Register a handler for `line` (0..=15) and unmask it at the PIC.
pub fn irq_register(line: u8, handler: IrqHandler) -> KernelResult<()> {
    if line as usize >= MAX_LINES {
        return Err(KernelError::InvalidArgument { name: "line", value: "out_of_range" });
    }
    let mut handlers = HANDLERS.lock();
    if handlers[line as usize].is_some() {
        return Err(KernelError::FsError(FsError::AlreadyExists));
    }
    handlers[line as usize] = Some(handler);
    drop(handlers);
    pic::unmask(line);
    Ok(())
}

/// Mask `line` at the PIC and remove its handler.
pub fn irq_unregister(line: u8) -> KernelResult<()> {
    if line as usize >= MAX_LINES {
        return Err(KernelError::InvalidArgument { name: "line", value: "out_of_range" });
    }
    pic::mask(line);
    HANDLERS.lock()[line as usize] = None;
    Ok(())
}

/// Invoke the handler registered for `line`, if any. Spurious interrupts
/// (no handler registered) are silently ignored.
pub fn dispatch(line: u8) {
    let handler = HANDLERS.lock().get(line as usize).copied().flatten();
    if let Some(handler) = handler {
        handler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static mut FIRED: bool = false;

    fn mark_fired() {
        // SAFETY: test runs single-threaded, no concurrent access.
        unsafe {
            FIRED = true;
        }
    }

    #[test_case]
    fn register_then_dispatch_invokes_handler() {
        irq_register(2, mark_fired).ok();
        dispatch(2);
        // SAFETY: see above.
        assert!(unsafe { FIRED });
        irq_unregister(2).ok();
    }

    #[test_case]
    fn dispatch_with_no_handler_is_a_noop() {
        dispatch(5);
    }
}
