//! Task descriptor.
//!
//! A task owns a priority class and a main thread. Its thread set is the ring
//! anchored at the main thread; every member holds a [`TaskHandle`] back to it.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use weak_map::WeakMap;

use crate::hal::spin::{Mutex, MutexGuard};
use crate::{TinyError, TinyResult};

use super::ring::ThreadRing;
use super::sched::{TaskPriority, apply_priority};
use super::thread::{Thread, ThreadId, ThreadRef};

/// Task identifier type.
pub type TaskId = usize;

/// Shared reference to a task.
pub type TaskRef = Arc<Task>;

static TASK_ID: AtomicUsize = AtomicUsize::new(1);

static TASK_TABLE: Mutex<WeakMap<TaskId, Weak<Task>>> = Mutex::new(WeakMap::new());

/// Non-owning reference from a thread to its task.
///
/// Resolves only while the task is alive and has not been torn down since the
/// handle was issued.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    epoch: u64,
    task: Weak<Task>,
}

impl TaskHandle {
    fn new(task: &TaskRef) -> Self {
        Self {
            id: task.id,
            epoch: task.epoch(),
            task: Arc::downgrade(task),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task if it is still alive and the epoch matches.
    pub fn upgrade(&self) -> Option<TaskRef> {
        self.task
            .upgrade()
            .filter(|task| task.epoch() == self.epoch)
    }

    /// Whether this handle currently designates `task`.
    pub fn is(&self, task: &Task) -> bool {
        core::ptr::eq(self.task.as_ptr(), task) && task.epoch() == self.epoch
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Lock-protected part of a task.
pub(crate) struct TaskInner {
    /// Main thread. `None` only after teardown.
    pub(crate) main_thread: Option<ThreadRef>,
    /// Thread set, anchored at the main thread.
    pub(crate) threads: ThreadRing,
}

/// Task descriptor.
pub struct Task {
    /// Unique task identifier.
    id: TaskId,
    /// Task name for debugging.
    name: &'static str,
    /// Bumped on teardown to invalidate outstanding handles.
    epoch: AtomicU64,
    /// Priority class. Written only with `inner` locked.
    priority: AtomicU8,
    /// Membership state. Attach, detach and scheduler traversal lock it.
    inner: Mutex<TaskInner>,
}

impl Task {
    /// Creates a task around `main_thread` and computes the main thread's
    /// effective priority.
    ///
    /// Fails with [`TinyError::Busy`] if `main_thread` already belongs to a task.
    pub(crate) fn new(
        name: &'static str,
        priority: TaskPriority,
        main_thread: &ThreadRef,
    ) -> TinyResult<TaskRef> {
        let mut back = main_thread.task_slot();
        if back.is_some() || main_thread.is_linked() {
            return Err(TinyError::Busy);
        }

        let id = TASK_ID.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(Self {
            id,
            name,
            epoch: AtomicU64::new(0),
            priority: AtomicU8::new(priority.get()),
            inner: Mutex::new(TaskInner {
                main_thread: Some(main_thread.clone()),
                threads: ThreadRing::init(main_thread.clone()),
            }),
        });

        apply_priority(main_thread, priority);
        *back = Some(TaskHandle::new(&task));
        drop(back);

        TASK_TABLE.lock().insert(id, &task);

        info!(
            "Task Created: id={}, name={}, priority={}, main_thread={}",
            id,
            name,
            priority.get(),
            main_thread.id()
        );
        Ok(task)
    }

    /// Returns the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the task priority class.
    #[inline]
    pub fn priority(&self) -> TaskPriority {
        // Only valid classes are ever stored.
        TaskPriority::new(self.priority.load(Ordering::Acquire)).unwrap_or(TaskPriority::MIN)
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Issues a back-reference handle for the current epoch.
    pub fn handle(self: &Arc<Self>) -> TaskHandle {
        TaskHandle::new(self)
    }

    /// Returns the main thread, or `None` once the task has been torn down.
    pub fn main_thread(&self) -> Option<ThreadRef> {
        self.inner.lock().main_thread.clone()
    }

    /// Number of threads in the task, main thread included.
    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.len()
    }

    /// Whether `thread` is reachable from the main thread's ring.
    pub fn contains(&self, thread: &Thread) -> bool {
        self.inner
            .lock()
            .threads
            .iter()
            .any(|member| core::ptr::eq(member, thread))
    }

    /// IDs of all member threads, main thread first.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.inner.lock().threads.iter().map(Thread::id).collect()
    }

    /// Visits every member thread with the membership lock held.
    ///
    /// This is the traversal the scheduler uses: it never observes a
    /// half-spliced ring or a member whose priority is being rewritten.
    pub fn for_each_thread(&self, mut f: impl FnMut(&Thread)) {
        let inner = self.inner.lock();
        for thread in inner.threads.iter() {
            f(thread);
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock()
    }

    /// Caller holds the membership lock.
    pub(crate) fn store_priority(&self, priority: TaskPriority) {
        self.priority.store(priority.get(), Ordering::Release);
    }

    /// Invalidates every handle issued so far and drops the task from the
    /// task table. Caller holds the membership lock.
    pub(crate) fn retire(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        // Released after the table lock, in case it is the last reference.
        let removed = TASK_TABLE.lock().remove(&self.id);
        drop(removed);
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Dropped without teardown: unlink the members and clear their
        // back-references so they can join another task.
        for thread in self.inner.get_mut().threads.take_all() {
            *thread.task_slot() = None;
        }
        TASK_TABLE.lock().remove(&self.id);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Looks up a live task by ID.
pub fn lookup_task(id: TaskId) -> Option<TaskRef> {
    TASK_TABLE.lock().get(&id)
}
