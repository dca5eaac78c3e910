//! HAL (Hardware Abstraction Layer) module.
//!
//! Only the pieces the task core needs: local interrupt masking and the
//! interrupt-safe spin lock built on top of it.

pub mod irq;
pub mod spin;

pub use irq::{disable_irqs, enable_irqs, irqs_disabled};
