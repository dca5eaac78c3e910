//! Task and thread membership manager.
//!
//! This module provides the membership operations of the task core:
//! - Attach/detach of threads to/from a task's thread ring
//! - Effective priority recomputation on attach and on priority changes
//! - Whole-task teardown, the only path that removes a main thread
//!
//! Every ring mutation and the priority writes that go with it happen under
//! the task's membership lock, the same lock [`Task::for_each_thread`] takes.
//! The scheduler hook is called after that lock is released.

use alloc::sync::Arc;

use lazyinit::LazyInit;

use crate::{TinyError, TinyResult};

use super::sched::{
    SchedHook, TaskPriority, ThreadPriority, apply_priority, set_relative_priority,
};
use super::task::{Task, TaskId, TaskRef, lookup_task};
use super::thread::{ThreadId, ThreadRef, lookup_thread};

/// Global membership manager instance.
static MANAGER: LazyInit<MembershipManager> = LazyInit::new();

/// Maintains task thread sets and the effective priority of their members.
pub struct MembershipManager {
    /// Scheduler re-ranking hook.
    hook: Arc<dyn SchedHook>,
}

impl MembershipManager {
    /// Creates a manager reporting priority changes to `hook`.
    pub fn new(hook: Arc<dyn SchedHook>) -> Self {
        Self { hook }
    }

    fn notify(&self, threads: &[ThreadRef]) {
        for thread in threads {
            self.hook.notify_priority_changed(thread);
        }
    }

    /// Creates a task with `main_thread` as its ring anchor.
    ///
    /// Fails with [`TinyError::Busy`] if `main_thread` already belongs to a task.
    pub fn create_task(
        &self,
        name: &'static str,
        priority: TaskPriority,
        main_thread: &ThreadRef,
    ) -> TinyResult<TaskRef> {
        let task = Task::new(name, priority, main_thread).inspect_err(|_| {
            warn!(
                "Task {}: main thread {} already belongs to a task",
                name,
                main_thread.id()
            )
        })?;
        self.hook.notify_priority_changed(main_thread);
        Ok(task)
    }

    /// Adds `thread` to `task`, right after the main thread, and recomputes
    /// its effective priority.
    ///
    /// # Errors
    /// - [`TinyError::InvalidArgument`] if the task has no main thread.
    /// - [`TinyError::Busy`] if the thread already belongs to a task.
    pub fn attach(&self, task: &TaskRef, thread: &ThreadRef) -> TinyResult<()> {
        let mut inner = task.lock();
        let Some(main) = inner.main_thread.clone() else {
            warn!("attach: task {} has no main thread", task.id());
            return Err(TinyError::InvalidArgument);
        };

        let mut back = thread.task_slot();
        if back.is_some() || thread.is_linked() {
            warn!(
                "attach: thread {} already belongs to task {:?}",
                thread.id(),
                back.as_ref().map(|h| h.id())
            );
            return Err(TinyError::Busy);
        }

        // Safety: the main thread anchors the ring for as long as it is set,
        // and both only change under this lock.
        unsafe { inner.threads.insert_after(thread.clone(), &main) };
        *back = Some(task.handle());
        let effective = apply_priority(thread, task.priority());
        drop(back);
        drop(inner);

        debug!(
            "Thread {} ({}) attached to task {} ({}), effective priority {}",
            thread.id(),
            thread.name(),
            task.id(),
            task.name(),
            effective
        );
        self.hook.notify_priority_changed(thread);
        Ok(())
    }

    /// Removes a satellite `thread` from `task` and clears its back-reference.
    ///
    /// The thread's effective priority is left as is; it is meaningless until
    /// the next attach recomputes it.
    ///
    /// # Errors
    /// - [`TinyError::InvalidArgument`] if the task has no main thread or the
    ///   thread is not one of its members.
    /// - [`TinyError::Busy`] if `thread` is the main thread. Use
    ///   [`MembershipManager::teardown`] instead.
    pub fn detach(&self, task: &TaskRef, thread: &ThreadRef) -> TinyResult<()> {
        let mut inner = task.lock();
        let Some(main) = inner.main_thread.as_ref() else {
            warn!("detach: task {} has no main thread", task.id());
            return Err(TinyError::InvalidArgument);
        };

        if Arc::ptr_eq(main, thread) {
            warn!(
                "detach: thread {} is the main thread of task {}",
                thread.id(),
                task.id()
            );
            return Err(TinyError::Busy);
        }

        let mut back = thread.task_slot();
        if !back.as_ref().is_some_and(|h| h.is(task)) {
            warn!(
                "detach: thread {} is not a member of task {}",
                thread.id(),
                task.id()
            );
            return Err(TinyError::InvalidArgument);
        }

        // Safety: the back-reference names this task, and it is set exactly
        // while the thread is linked into this task's ring.
        let removed = unsafe { inner.threads.remove(thread) };
        debug_assert!(removed.is_some());
        *back = None;
        drop(back);
        drop(inner);
        drop(removed);

        debug!(
            "Thread {} ({}) detached from task {} ({})",
            thread.id(),
            thread.name(),
            task.id(),
            task.name()
        );
        Ok(())
    }

    /// [`MembershipManager::attach`] by IDs. An ID that does not resolve is
    /// [`TinyError::InvalidArgument`].
    pub fn attach_by_id(&self, task: TaskId, thread: ThreadId) -> TinyResult<()> {
        let (task, thread) = resolve(task, thread)?;
        self.attach(&task, &thread)
    }

    /// [`MembershipManager::detach`] by IDs. An ID that does not resolve is
    /// [`TinyError::InvalidArgument`].
    pub fn detach_by_id(&self, task: TaskId, thread: ThreadId) -> TinyResult<()> {
        let (task, thread) = resolve(task, thread)?;
        self.detach(&task, &thread)
    }

    /// Changes the priority class of `task` and recomputes every member in
    /// the same critical section.
    pub fn set_task_priority(&self, task: &TaskRef, priority: TaskPriority) {
        let inner = task.lock();
        task.store_priority(priority);
        let members = inner.threads.members();
        for thread in &members {
            apply_priority(thread, priority);
        }
        drop(inner);

        info!(
            "Task {} ({}) priority -> {}, {} threads re-ranked",
            task.id(),
            task.name(),
            priority.get(),
            members.len()
        );
        self.notify(&members);
    }

    /// Recomputes the effective priority of every member of `task` from the
    /// current task and relative priorities.
    pub fn recompute_all(&self, task: &TaskRef) {
        let inner = task.lock();
        let priority = task.priority();
        let members = inner.threads.members();
        for thread in &members {
            apply_priority(thread, priority);
        }
        drop(inner);
        self.notify(&members);
    }

    /// Changes the relative priority of `thread`. If it belongs to a task its
    /// effective priority is recomputed under that task's lock.
    pub fn set_thread_priority(&self, thread: &ThreadRef, priority: ThreadPriority) {
        loop {
            let handle = {
                let back = thread.task_slot();
                match back.as_ref() {
                    None => {
                        // Detached: the next attach reads the new value.
                        set_relative_priority(thread, priority);
                        return;
                    }
                    Some(handle) => handle.clone(),
                }
            };

            let Some(task) = handle.upgrade() else {
                // Task is going away. Retry once the back-reference settles.
                core::hint::spin_loop();
                continue;
            };

            let inner = task.lock();
            let back = thread.task_slot();
            if !back.as_ref().is_some_and(|h| h.is(&task)) {
                // Moved between tasks while we were not looking.
                continue;
            }
            set_relative_priority(thread, priority);
            apply_priority(thread, task.priority());
            drop(back);
            drop(inner);

            self.hook.notify_priority_changed(thread);
            return;
        }
    }

    /// Tears down the membership of `task` and hands back its main thread.
    ///
    /// Afterwards the task has no main thread, every handle to it is stale,
    /// and it is no longer found by [`lookup_task`].
    ///
    /// # Errors
    /// - [`TinyError::InvalidArgument`] if the task was already torn down.
    /// - [`TinyError::Busy`] while satellite threads remain attached.
    pub fn teardown(&self, task: &TaskRef) -> TinyResult<ThreadRef> {
        let mut inner = task.lock();
        let Some(main) = inner.main_thread.clone() else {
            warn!("teardown: task {} already torn down", task.id());
            return Err(TinyError::InvalidArgument);
        };

        let satellites = inner.threads.len() - 1;
        if satellites > 0 {
            warn!(
                "teardown: task {} still has {} satellite threads",
                task.id(),
                satellites
            );
            return Err(TinyError::Busy);
        }

        // Safety: the main thread is the ring anchor.
        let removed = unsafe { inner.threads.remove(&main) };
        inner.main_thread = None;
        *main.task_slot() = None;
        task.retire();
        drop(inner);
        drop(removed);

        info!(
            "Task Destroyed: id={}, name={}, main_thread={}",
            task.id(),
            task.name(),
            main.id()
        );
        Ok(main)
    }
}

fn resolve(task: TaskId, thread: ThreadId) -> TinyResult<(TaskRef, ThreadRef)> {
    let task = lookup_task(task).ok_or(TinyError::InvalidArgument)?;
    let thread = lookup_thread(thread).ok_or(TinyError::InvalidArgument)?;
    Ok((task, thread))
}

// ============================================================================
// Public API functions
// ============================================================================

/// Installs the global membership manager.
///
/// # Panics
/// Panics if called more than once.
pub fn init(hook: Arc<dyn SchedHook>) {
    info!("Initializing task membership manager...");
    MANAGER.init_once(MembershipManager::new(hook));
}

/// Returns whether the global manager is installed.
pub fn is_initialized() -> bool {
    MANAGER.is_inited()
}

fn manager() -> &'static MembershipManager {
    MANAGER.get().expect("Task manager not initialized")
}

/// Creates a task through the global manager.
pub fn create_task(
    name: &'static str,
    priority: TaskPriority,
    main_thread: &ThreadRef,
) -> TinyResult<TaskRef> {
    manager().create_task(name, priority, main_thread)
}

/// Attaches a thread to a task through the global manager.
pub fn attach(task: &TaskRef, thread: &ThreadRef) -> TinyResult<()> {
    manager().attach(task, thread)
}

/// Detaches a thread from a task through the global manager.
pub fn detach(task: &TaskRef, thread: &ThreadRef) -> TinyResult<()> {
    manager().detach(task, thread)
}

/// Changes a task's priority class through the global manager.
pub fn set_task_priority(task: &TaskRef, priority: TaskPriority) {
    manager().set_task_priority(task, priority)
}

/// Changes a thread's relative priority through the global manager.
pub fn set_thread_priority(thread: &ThreadRef, priority: ThreadPriority) {
    manager().set_thread_priority(thread, priority)
}

/// Tears a task down through the global manager.
pub fn teardown(task: &TaskRef) -> TinyResult<ThreadRef> {
    manager().teardown(task)
}
