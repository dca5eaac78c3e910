//! Kernel configuration constants.
//!
//! Each value can be overridden at build time through the environment
//! variable of the same name, e.g. `THREAD_PRIORITY_TOTAL=64 cargo build`.

use const_env::from_env;

/// Number of task priority classes. Valid classes are `0..TASK_PRIORITY_TOTAL`.
#[from_env]
pub const TASK_PRIORITY_TOTAL: u8 = 32;

/// Number of relative priority levels inside one task class.
#[from_env]
pub const THREAD_PRIORITY_TOTAL: u8 = 32;

#[from_env]
pub const THREAD_STACK_SIZE: usize = 0x4000; // 16K
