//! Task management module.
//!
//! This module provides the task/thread composition core:
//! - Thread descriptors (state, context, stack, join linkage)
//! - Task descriptors owning a main thread and a thread ring
//! - Effective priority from task class and thread relative priority
//! - Membership manager reporting priority changes to the scheduler
//!
//! # Task Layout
//!
//! - Every task has one main thread, created together with the task.
//! - Satellite threads are attached right after the main thread in its ring.
//! - The main thread only leaves through whole-task teardown.

pub mod context;
pub mod manager;
pub mod ring;
pub mod sched;
#[allow(clippy::module_inception)]
pub mod task;
pub mod thread;


pub use manager::{
    MembershipManager, attach, create_task, detach, init as init_taskmanager, is_initialized,
    set_task_priority, set_thread_priority, teardown,
};
pub use sched::{
    NoopHook, SchedAttr, SchedHook, SchedPriority, TaskPriority, ThreadPriority, combine,
    relative_priority, split,
};
pub use task::{Task, TaskHandle, TaskId, TaskRef, lookup_task};
pub use thread::{
    EntrySlot, Thread, ThreadEntry, ThreadId, ThreadRef, ThreadState, WaitData, lookup_thread,
};
