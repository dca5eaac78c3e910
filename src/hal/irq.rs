//! Local interrupt mask control.
//!
//! On bare-metal AArch64 this drives the `I` bit of `DAIF`. Test builds keep a
//! software mask per OS thread, so each test thread behaves like its own CPU.
//! Other hosted builds have nothing to mask.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod imp {
    use core::arch::asm;

    const DAIF_I: u64 = 1 << 7;

    #[inline]
    pub fn irqs_disabled() -> bool {
        let daif: u64;
        unsafe { asm!("mrs {}, daif", out(reg) daif) };
        daif & DAIF_I != 0
    }

    #[inline]
    pub fn disable_irqs() {
        unsafe { asm!("msr daifset, #2") }
    }

    #[inline]
    pub fn enable_irqs() {
        unsafe { asm!("msr daifclr, #2") }
    }
}

#[cfg(all(not(all(target_arch = "aarch64", target_os = "none")), test))]
mod imp {
    use core::cell::Cell;

    std::thread_local! {
        static MASKED: Cell<bool> = const { Cell::new(false) };
    }

    pub fn irqs_disabled() -> bool {
        MASKED.with(|m| m.get())
    }

    pub fn disable_irqs() {
        MASKED.with(|m| m.set(true));
    }

    pub fn enable_irqs() {
        MASKED.with(|m| m.set(false));
    }
}

// A hosted process has no interrupts to mask: the lock still excludes, and
// the mask always reads as enabled.
#[cfg(all(not(all(target_arch = "aarch64", target_os = "none")), not(test)))]
mod imp {
    #[inline]
    pub fn irqs_disabled() -> bool {
        false
    }

    #[inline]
    pub fn disable_irqs() {}

    #[inline]
    pub fn enable_irqs() {}
}

/// Returns `true` if local interrupts are masked.
#[inline]
pub fn irqs_disabled() -> bool {
    imp::irqs_disabled()
}

/// Masks local interrupts.
#[inline]
pub fn disable_irqs() {
    imp::disable_irqs()
}

/// Unmasks local interrupts.
#[inline]
pub fn enable_irqs() {
    imp::enable_irqs()
}
