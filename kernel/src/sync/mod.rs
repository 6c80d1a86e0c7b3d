//! Synchronization primitives.

pub mod irq_lock;
pub mod once_lock;

pub use irq_lock::{IrqSpinLock, IrqSpinLockGuard};
pub use once_lock::{GlobalState, LazyLock, OnceLock};
