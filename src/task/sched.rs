//! Scheduler-facing priority attributes.
//!
//! A thread's effective priority is derived from two independent inputs: its
//! task's priority class and its own relative priority. Larger values are
//! more urgent, for all three priority kinds.

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU16, Ordering};

use crate::config::kernel::{TASK_PRIORITY_TOTAL, THREAD_PRIORITY_TOTAL};
use crate::{TinyError, TinyResult};

use super::thread::{Thread, ThreadRef};

/// Priority class of a task, in `0..TASK_PRIORITY_TOTAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskPriority(u8);

/// Priority of a thread relative to the other threads of its task, in
/// `0..THREAD_PRIORITY_TOTAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadPriority(u8);

/// Effective priority consumed by the run-queue scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedPriority(u16);

impl TaskPriority {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(TASK_PRIORITY_TOTAL - 1);
    pub const DEFAULT: Self = Self(TASK_PRIORITY_TOTAL / 2);

    pub fn new(value: u8) -> TinyResult<Self> {
        if value < TASK_PRIORITY_TOTAL {
            Ok(Self(value))
        } else {
            Err(TinyError::InvalidPriority(value as usize))
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl ThreadPriority {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(THREAD_PRIORITY_TOTAL - 1);
    pub const DEFAULT: Self = Self(THREAD_PRIORITY_TOTAL / 2);

    pub fn new(value: u8) -> TinyResult<Self> {
        if value < THREAD_PRIORITY_TOTAL {
            Ok(Self(value))
        } else {
            Err(TinyError::InvalidPriority(value as usize))
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl SchedPriority {
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SchedPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Every effective priority must fit the `u16` band layout.
const _: () = assert!(
    TASK_PRIORITY_TOTAL as u32 * THREAD_PRIORITY_TOTAL as u32 <= u16::MAX as u32 + 1
);

/// Combines a task class and a relative priority into the effective priority.
///
/// Every class occupies its own band of `THREAD_PRIORITY_TOTAL` levels, so a
/// thread of a more urgent task always outranks any thread of a less urgent
/// one, and the function is monotonic in both arguments.
#[inline]
pub const fn combine(task: TaskPriority, relative: ThreadPriority) -> SchedPriority {
    SchedPriority(task.0 as u16 * THREAD_PRIORITY_TOTAL as u16 + relative.0 as u16)
}

/// Recovers the relative part of `effective` within the band of `task`.
///
/// Returns `None` if `effective` lies outside that band.
pub fn split(task: TaskPriority, effective: SchedPriority) -> Option<ThreadPriority> {
    let base = combine(task, ThreadPriority::MIN).0;
    effective
        .0
        .checked_sub(base)
        .filter(|rel| *rel < THREAD_PRIORITY_TOTAL as u16)
        .map(|rel| ThreadPriority(rel as u8))
}

/// Scheduler-private attributes of a thread.
///
/// Writes happen under the owning task's lock. The fields are atomics so a
/// scheduler holding that lock reads them without further synchronization.
pub struct SchedAttr {
    relative: AtomicU8,
    effective: AtomicU16,
}

impl SchedAttr {
    pub(crate) const fn new(relative: ThreadPriority) -> Self {
        Self {
            relative: AtomicU8::new(relative.0),
            effective: AtomicU16::new(combine(TaskPriority::MIN, relative).0),
        }
    }

    #[inline]
    pub fn relative(&self) -> ThreadPriority {
        ThreadPriority(self.relative.load(Ordering::Acquire))
    }

    /// Current effective priority. Meaningless while the thread is detached.
    #[inline]
    pub fn effective(&self) -> SchedPriority {
        SchedPriority(self.effective.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_relative(&self, prio: ThreadPriority) {
        self.relative.store(prio.0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn set_effective(&self, prio: SchedPriority) {
        self.effective.store(prio.0, Ordering::Release);
    }
}

impl fmt::Debug for SchedAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedAttr")
            .field("relative", &self.relative())
            .field("effective", &self.effective())
            .finish()
    }
}

/// Returns the relative priority of `thread`.
#[inline]
pub fn relative_priority(thread: &Thread) -> ThreadPriority {
    thread.sched_attr().relative()
}

/// Overwrites the relative priority of `thread` without recomputing its
/// effective priority.
///
/// Only valid for detached threads; attached threads go through
/// [`MembershipManager::set_thread_priority`](super::MembershipManager::set_thread_priority).
#[inline]
pub(crate) fn set_relative_priority(thread: &Thread, prio: ThreadPriority) {
    thread.sched_attr().set_relative(prio);
}

/// Writes the combined priority of `task` and the thread's relative priority
/// into its scheduling attributes. Caller holds the task lock and notifies
/// the scheduler afterwards.
pub(crate) fn apply_priority(thread: &Thread, task: TaskPriority) -> SchedPriority {
    let effective = combine(task, relative_priority(thread));
    thread.sched_attr().set_effective(effective);
    trace!(
        "thread {} effective priority -> {} (task {}, relative {})",
        thread.id(),
        effective,
        task.get(),
        relative_priority(thread).get()
    );
    effective
}

/// Hook into the run-queue scheduler.
///
/// Called after every effective-priority write so the scheduler can re-rank
/// the thread. Never invoked with a task lock held.
pub trait SchedHook: Send + Sync {
    fn notify_priority_changed(&self, thread: &ThreadRef);
}

/// Hook for kernels without a priority-aware scheduler.
pub struct NoopHook;

impl SchedHook for NoopHook {
    fn notify_priority_changed(&self, _thread: &ThreadRef) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranges_are_checked() {
        assert!(TaskPriority::new(TASK_PRIORITY_TOTAL - 1).is_ok());
        assert!(TaskPriority::new(10).is_ok());
        assert_eq!(
            TaskPriority::new(TASK_PRIORITY_TOTAL),
            Err(TinyError::InvalidPriority(TASK_PRIORITY_TOTAL as usize))
        );
        assert!(ThreadPriority::new(0).is_ok());
        assert_eq!(
            ThreadPriority::new(THREAD_PRIORITY_TOTAL),
            Err(TinyError::InvalidPriority(THREAD_PRIORITY_TOTAL as usize))
        );
    }

    #[test]
    fn task_class_dominates_relative_priority() {
        let low_task_top = combine(TaskPriority::new(1).unwrap(), ThreadPriority::MAX);
        let high_task_bottom = combine(TaskPriority::new(2).unwrap(), ThreadPriority::MIN);
        assert!(high_task_bottom > low_task_top);
    }

    #[test]
    fn split_inverts_combine() {
        let task = TaskPriority::new(3).unwrap();
        let rel = ThreadPriority::new(7).unwrap();
        assert_eq!(split(task, combine(task, rel)), Some(rel));

        let other = TaskPriority::new(4).unwrap();
        assert_eq!(split(other, combine(task, rel)), None);
        assert_eq!(split(TaskPriority::MIN, combine(task, rel)), None);
    }

    #[test]
    fn extremes_fit_effective_range() {
        let top = combine(TaskPriority::MAX, ThreadPriority::MAX);
        assert_eq!(
            top.get() as usize,
            TASK_PRIORITY_TOTAL as usize * THREAD_PRIORITY_TOTAL as usize - 1
        );
        assert_eq!(combine(TaskPriority::MIN, ThreadPriority::MIN).get(), 0);
    }
}
