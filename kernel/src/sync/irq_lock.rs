//! Interrupt-disabling spinlock.
//!
//! Grounded on the teacher's `arch::x86_64::disable_interrupts() -> impl
//! Drop` guard: acquiring the lock disables interrupts on the local CPU
//! and records whether they were already disabled, restoring the prior
//! `IF` state on release (spec.md §5's "Spinlocks disable local
//! interrupts on acquire and restore the prior IF state on release").
//! This is the lock every per-CPU scheduler queue, the process table,
//! and per-process state use.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86_64::InterruptGuard;

/// A spinlock that disables interrupts on the local CPU while held.
pub struct IrqSpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to the inner `T` is only ever granted through
// `IrqSpinLockGuard`, which is only constructed while `locked` is held.
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
    _irq: InterruptGuard,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Disable interrupts, then spin until the lock is acquired.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = crate::arch::x86_64::disable_interrupts();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        IrqSpinLockGuard { lock: self, _irq: irq }
    }

    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = crate::arch::x86_64::disable_interrupts();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqSpinLockGuard { lock: self, _irq: irq })
        } else {
            None
        }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies `locked` is true and this guard
        // is the only live reference to `data`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`; `&mut self` additionally proves exclusivity.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        // `_irq` drops after this, restoring the prior IF state.
    }
}
