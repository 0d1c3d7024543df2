//! Synchronization primitives.

pub mod once_lock;
pub mod spinlock;

pub use once_lock::{GlobalState, LazyLock, OnceLock};
pub use spinlock::{IrqSpinlock, IrqSpinlockGuard};
