//! Interrupt-disabling spinlock.
//!
//! Every shared kernel structure (PMM bitmap, VMM page-table roots, heap
//! arena, block-device registry, VFS mount/fd tables, filesystem registry)
//! is guarded by one of these. Acquisition saves RFLAGS and clears IF;
//! release restores the saved flags. This is what makes a critical section
//! atomic with respect to IRQ handlers on a single core: an interrupt firing
//! mid-section simply cannot happen because IF is clear for its duration.
//!
//! Lock ordering is a convention enforced by code review, not the type
//! system: `pmm -> vmm -> heap` and `vfs -> fs_driver -> blkdev`.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

#[cfg(target_arch = "x86_64")]
fn read_and_disable_interrupts() -> bool {
    let flags: u64;
    // SAFETY: pushfq/popfq and cli only touch RFLAGS and the stack; no
    // memory access beyond the implicit stack slot.
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {flags}",
            "cli",
            flags = out(reg) flags,
            options(nomem, preserves_flags)
        );
    }
    flags & (1 << 9) != 0
}

#[cfg(target_arch = "x86_64")]
fn restore_interrupts(were_enabled: bool) {
    if were_enabled {
        // SAFETY: sti re-enables maskable interrupts; no memory side effects.
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }
}

/// A `spin::Mutex`-shaped lock that additionally disables interrupts for the
/// duration of the critical section.
pub struct IrqSpinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `lock()`, which
// holds `locked` for the guard's lifetime, so concurrent access (including
// from an interrupt handler, which cannot fire while IF is clear) is
// excluded.
unsafe impl<T: Send> Sync for IrqSpinlock<T> {}
unsafe impl<T: Send> Send for IrqSpinlock<T> {}

impl<T> IrqSpinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> IrqSpinlockGuard<'_, T> {
        let were_enabled = read_and_disable_interrupts();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        IrqSpinlockGuard {
            lock: self,
            were_enabled,
        }
    }
}

pub struct IrqSpinlockGuard<'a, T> {
    lock: &'a IrqSpinlock<T>,
    were_enabled: bool,
}

impl<T> Deref for IrqSpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means `locked` is true and only this
        // guard can produce a reference to `data`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref; the guard has exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        restore_interrupts(self.were_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn lock_then_unlock_allows_relock() {
        let lock = IrqSpinlock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        let guard = lock.lock();
        assert_eq!(*guard, 1);
    }
}
