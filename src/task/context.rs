//! Saved CPU state of a thread that is not running.
//!
//! The layout belongs to the architecture's context-switch routine; the task
//! core only initializes it and hands it over.

/// Callee-saved AArch64 registers plus stack pointer and thread pointer.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadContext {
    pub sp: u64,
    pub tpidr_el0: u64,
    pub r19: u64,
    pub r20: u64,
    pub r21: u64,
    pub r22: u64,
    pub r23: u64,
    pub r24: u64,
    pub r25: u64,
    pub r26: u64,
    pub r27: u64,
    pub r28: u64,
    pub r29: u64,
    /// Return address of the switch routine, i.e. where the thread resumes.
    pub lr: u64,
}

impl ThreadContext {
    /// Creates a zeroed context.
    pub const fn new() -> Self {
        Self {
            sp: 0,
            tpidr_el0: 0,
            r19: 0,
            r20: 0,
            r21: 0,
            r22: 0,
            r23: 0,
            r24: 0,
            r25: 0,
            r26: 0,
            r27: 0,
            r28: 0,
            r29: 0,
            lr: 0,
        }
    }

    /// Prepares the context so the first switch to it lands in `entry` on the
    /// stack whose top is `kstack_top`.
    pub fn init(&mut self, entry: usize, kstack_top: usize, tls_area: usize) {
        // AAPCS64 requires a 16-byte aligned stack pointer.
        self.sp = (kstack_top & !0xf) as u64;
        self.lr = entry as u64;
        self.tpidr_el0 = tls_area as u64;
    }
}
