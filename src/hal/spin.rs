//! Interrupt-safe spin lock.
//!
//! Every lock in the task core is a [`Mutex`] over [`SpinNoIrq`]: local
//! interrupts stay masked for as long as a guard is alive, so an interrupt
//! handler on the same CPU can never spin on a lock its CPU already holds.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use lock_api::{GuardNoSend, RawMutex};

use crate::hal::irq::{disable_irqs, enable_irqs, irqs_disabled};

/// Raw lock that masks local interrupts while held.
///
/// The mask seen at acquisition is restored on release, so nested locks
/// unwind to the right state. Guards are `!Send`: the saved mask belongs to
/// the CPU that took the lock.
pub struct SpinNoIrq {
    held: AtomicBool,
    /// Whether interrupts were enabled before the holder masked them.
    irqs_were_on: UnsafeCell<bool>,
}

// Safety: `irqs_were_on` is only touched by the current holder.
unsafe impl Sync for SpinNoIrq {}
unsafe impl Send for SpinNoIrq {}

/// Masks interrupts, returning whether they were enabled.
#[inline]
fn mask_irqs() -> bool {
    let were_on = !irqs_disabled();
    disable_irqs();
    were_on
}

#[inline]
fn restore_irqs(were_on: bool) {
    if were_on {
        enable_irqs();
    }
}

impl SpinNoIrq {
    #[inline]
    fn try_acquire(&self, weak: bool) -> bool {
        let result = if weak {
            self.held
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        } else {
            self.held
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        };
        result.is_ok()
    }
}

unsafe impl RawMutex for SpinNoIrq {
    type GuardMarker = GuardNoSend;
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        held: AtomicBool::new(false),
        irqs_were_on: UnsafeCell::new(false),
    };

    fn lock(&self) {
        let were_on = mask_irqs();
        while !self.try_acquire(true) {
            // Test-and-test-and-set: wait on a plain load before retrying.
            while self.held.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        unsafe { *self.irqs_were_on.get() = were_on };
    }

    fn try_lock(&self) -> bool {
        let were_on = mask_irqs();
        if !self.try_acquire(false) {
            restore_irqs(were_on);
            return false;
        }
        unsafe { *self.irqs_were_on.get() = were_on };
        true
    }

    unsafe fn unlock(&self) {
        let were_on = unsafe { *self.irqs_were_on.get() };
        self.held.store(false, Ordering::Release);
        restore_irqs(were_on);
    }

    fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

pub type Mutex<T> = lock_api::Mutex<SpinNoIrq, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, SpinNoIrq, T>;
