//! RstinyOS task core.
//!
//! Task/thread composition and priority propagation for the RstinyOS kernel:
//! - Thread and task descriptors
//! - Task thread sets kept on an intrusive ring anchored at the main thread
//! - Effective priority derived from task class and thread relative priority
//! - Membership manager driving an injected scheduler hook

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

#[macro_use]
pub mod console;

pub mod config;
pub mod error;
pub mod hal;
pub mod task;

pub use error::{TinyError, TinyResult};
