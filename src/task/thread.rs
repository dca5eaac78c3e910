//! Thread descriptor.
//!
//! Threads are the schedulable unit. A thread is created by [`Thread::new`]
//! with its stack and context ready, and enters a task through the
//! membership manager.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use intrusive_collections::LinkedListAtomicLink;
use weak_map::WeakMap;

use crate::config::kernel::THREAD_STACK_SIZE;
use crate::hal::spin::{Mutex, MutexGuard};
use crate::{TinyError, TinyResult};

use super::context::ThreadContext;
use super::sched::{SchedAttr, ThreadPriority};
use super::task::TaskHandle;

/// Thread identifier type.
pub type ThreadId = usize;

/// Shared reference to a thread.
pub type ThreadRef = Arc<Thread>;

/// Thread start routine. Takes the entry argument, returns the exit value.
pub type ThreadEntry = fn(usize) -> usize;

static THREAD_ID: AtomicUsize = AtomicUsize::new(1);

static THREAD_TABLE: Mutex<WeakMap<ThreadId, Weak<Thread>>> = Mutex::new(WeakMap::new());

/// Thread lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, never run.
    Created = 0,
    /// Currently running on a CPU.
    Running = 1,
    /// Blocked on a wait queue.
    Waiting = 2,
    /// Sleeping until a deadline.
    Sleeping = 3,
    /// Finished. Permanent.
    Exited = 4,
}

impl From<u8> for ThreadState {
    fn from(val: u8) -> Self {
        match val {
            0 => ThreadState::Created,
            1 => ThreadState::Running,
            2 => ThreadState::Waiting,
            3 => ThreadState::Sleeping,
            _ => ThreadState::Exited,
        }
    }
}

impl ThreadState {
    /// Whether `self -> to` is a legal lifecycle step.
    pub fn can_transition_to(self, to: ThreadState) -> bool {
        use ThreadState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Running, Waiting)
                | (Running, Sleeping)
                | (Waiting, Running)
                | (Sleeping, Running)
                | (Running, Exited)
        )
    }
}

/// The single overlapping entry slot. Which value it holds depends on the
/// lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySlot {
    /// Argument for the start routine, before the thread starts.
    Arg(usize),
    /// Return value of the start routine, after exit.
    Ret(usize),
    /// Exit value of a join target, delivered to this (joining) thread.
    JoinRet(usize),
    /// Consumed.
    Empty,
}

/// Owned execution stack of a thread, released when the thread is dropped.
pub struct ThreadStack {
    mem: Box<[u8]>,
}

impl ThreadStack {
    pub fn new(size: usize) -> Self {
        Self {
            mem: alloc::vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Initial stack pointer (one past the highest byte).
    #[inline]
    pub fn top(&self) -> usize {
        self.mem.as_ptr() as usize + self.mem.len()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.mem.len()
    }
}

/// Data private to the wait subsystem. The task core keeps it intact.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitData {
    /// Absolute wake-up deadline, if the wait is timed.
    pub deadline_ns: Option<u64>,
    /// Result code handed to the thread when it is woken.
    pub wait_result: isize,
}

/// Thread descriptor.
pub struct Thread {
    /// Unique thread identifier.
    id: ThreadId,
    /// Thread name for debugging.
    name: &'static str,
    /// Current lifecycle state (atomic for safe concurrent access).
    state: AtomicU8,
    /// Saved CPU state, valid only while the thread is not running.
    context: UnsafeCell<ThreadContext>,
    /// Start routine.
    entry: ThreadEntry,
    /// Argument, return value or join value, depending on `state`.
    slot: Mutex<EntrySlot>,
    /// Execution stack.
    stack: ThreadStack,
    /// Task this thread belongs to.
    task: Mutex<Option<TaskHandle>>,
    /// Link holding this thread in its task's thread ring.
    pub(crate) link: LinkedListAtomicLink,
    /// Thread that joined this one.
    joined: Mutex<Option<Weak<Thread>>>,
    /// Wait subsystem data.
    wait_data: Mutex<WaitData>,
    /// Scheduler-private attributes.
    sched_attr: SchedAttr,
}

// Safety: the context is only touched by the CPU switching to/from the thread.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    /// Creates a thread with a freshly allocated stack and initialized context.
    pub fn new(
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        relative: ThreadPriority,
    ) -> ThreadRef {
        Self::with_stack_size(name, entry, arg, relative, THREAD_STACK_SIZE)
    }

    /// Like [`Thread::new`] with an explicit stack size.
    pub fn with_stack_size(
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        relative: ThreadPriority,
        stack_size: usize,
    ) -> ThreadRef {
        let id = THREAD_ID.fetch_add(1, Ordering::SeqCst);
        let stack = ThreadStack::new(stack_size);

        let mut context = ThreadContext::new();
        context.init(entry as usize, stack.top(), 0);

        let thread = Arc::new(Self {
            id,
            name,
            state: AtomicU8::new(ThreadState::Created as u8),
            context: UnsafeCell::new(context),
            entry,
            slot: Mutex::new(EntrySlot::Arg(arg)),
            stack,
            task: Mutex::new(None),
            link: LinkedListAtomicLink::new(),
            joined: Mutex::new(None),
            wait_data: Mutex::new(WaitData::default()),
            sched_attr: SchedAttr::new(relative),
        });

        THREAD_TABLE.lock().insert(id, &thread);

        debug!(
            "Thread Created: id={}, name={}, relative_priority={}",
            id,
            name,
            relative.get()
        );
        thread
    }

    /// Returns the thread ID.
    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the thread name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current thread state.
    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from(self.state.load(Ordering::Acquire))
    }

    /// Atomically moves the thread to `to`.
    ///
    /// Fails with [`TinyError::InvalidTransition`] if the step is not legal
    /// from the state observed.
    pub fn transition(&self, to: ThreadState) -> TinyResult<()> {
        let mut from = self.state();
        loop {
            if !from.can_transition_to(to) {
                return Err(TinyError::InvalidTransition { from, to });
            }
            match self.state.compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => from = ThreadState::from(actual),
            }
        }
    }

    /// Returns a mutable reference to the saved context.
    ///
    /// # Safety
    /// Caller must ensure exclusive access to the context, i.e. the thread is
    /// not running and nobody else is switching to it.
    #[inline]
    pub unsafe fn context_mut(&self) -> &mut ThreadContext {
        unsafe { &mut *self.context.get() }
    }

    /// Returns a reference to the saved context.
    ///
    /// # Safety
    /// The thread must not be running and no context switch to it may be in
    /// progress.
    #[inline]
    pub unsafe fn context(&self) -> &ThreadContext {
        unsafe { &*self.context.get() }
    }

    #[inline]
    pub fn entry(&self) -> ThreadEntry {
        self.entry
    }

    #[inline]
    pub fn stack(&self) -> &ThreadStack {
        &self.stack
    }

    #[inline]
    pub fn sched_attr(&self) -> &SchedAttr {
        &self.sched_attr
    }

    /// Returns the current value of the entry slot.
    pub fn entry_slot(&self) -> EntrySlot {
        *self.slot.lock()
    }

    /// Locks the wait subsystem data.
    pub fn wait_data(&self) -> MutexGuard<'_, WaitData> {
        self.wait_data.lock()
    }

    /// Returns the handle of the task this thread belongs to, if any.
    pub fn task(&self) -> Option<TaskHandle> {
        self.task.lock().clone()
    }

    /// Locks the back-reference. Always taken after the owning task's lock.
    pub(crate) fn task_slot(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.task.lock()
    }

    /// Whether the membership link is in some task's ring.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.link.is_linked()
    }

    /// Returns the thread waiting to join this one, if it is still alive.
    pub fn joined(&self) -> Option<ThreadRef> {
        self.joined.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Starts the thread: `Created -> Running`. Returns the entry argument.
    ///
    /// Fails with [`TinyError::Busy`] if the argument is no longer in the slot.
    pub fn start(&self) -> TinyResult<usize> {
        let mut slot = self.slot.lock();
        let EntrySlot::Arg(arg) = *slot else {
            warn!("Thread {} started without an entry argument", self.id);
            return Err(TinyError::Busy);
        };
        self.transition(ThreadState::Running)?;
        *slot = EntrySlot::Empty;
        Ok(arg)
    }

    /// Exits the thread: `Running -> Exited`, publishing `ret`.
    ///
    /// If a joiner is registered the value moves into its slot and the joiner
    /// is returned so the wait subsystem can release it.
    pub fn exit(&self, ret: usize) -> TinyResult<Option<ThreadRef>> {
        let joined = self.joined.lock();
        self.transition(ThreadState::Exited)?;

        info!("Thread Exited: id={}, name={}, ret={:#x}", self.id, self.name, ret);

        match joined
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|joiner| joiner.state() != ThreadState::Exited)
        {
            Some(joiner) => {
                *self.slot.lock() = EntrySlot::Empty;
                *joiner.slot.lock() = EntrySlot::JoinRet(ret);
                Ok(Some(joiner))
            }
            None => {
                *self.slot.lock() = EntrySlot::Ret(ret);
                Ok(None)
            }
        }
    }

    /// Registers `joiner` as the thread joining this one.
    ///
    /// Returns `Some(ret)` if this thread already exited (the value is moved to
    /// the caller), `None` if the joiner has to wait for [`Thread::exit`].
    /// Only a running thread can join: any other state still owns its slot.
    pub fn join_by(&self, joiner: &ThreadRef) -> TinyResult<Option<usize>> {
        if core::ptr::eq(self, Arc::as_ptr(joiner)) {
            warn!("Thread {} attempted to join itself", self.id);
            return Err(TinyError::InvalidArgument);
        }
        if joiner.state() != ThreadState::Running {
            warn!(
                "Thread {} cannot join {} while {:?}",
                joiner.id,
                self.id,
                joiner.state()
            );
            return Err(TinyError::InvalidArgument);
        }

        let mut joined = self.joined.lock();
        if joined.as_ref().and_then(Weak::upgrade).is_some() {
            warn!("Thread {} already has a joiner", self.id);
            return Err(TinyError::Busy);
        }

        if self.state() == ThreadState::Exited {
            let mut slot = self.slot.lock();
            return match *slot {
                EntrySlot::Ret(ret) => {
                    *slot = EntrySlot::Empty;
                    *joined = Some(Arc::downgrade(joiner));
                    Ok(Some(ret))
                }
                // Someone already collected the exit value.
                _ => Err(TinyError::Busy),
            };
        }

        *joined = Some(Arc::downgrade(joiner));
        Ok(None)
    }

    /// Collects the exit value delivered by a joined thread.
    pub fn take_join_value(&self) -> Option<usize> {
        let mut slot = self.slot.lock();
        match *slot {
            EntrySlot::JoinRet(ret) => {
                *slot = EntrySlot::Empty;
                Some(ret)
            }
            _ => None,
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        THREAD_TABLE.lock().remove(&self.id);
        trace!("Thread Released: id={}, stack={:#x}", self.id, self.stack.size());
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("sched_attr", &self.sched_attr)
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Looks up a live thread by ID.
pub fn lookup_thread(id: ThreadId) -> Option<ThreadRef> {
    THREAD_TABLE.lock().get(&id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(arg: usize) -> usize {
        arg
    }

    fn spawn(name: &'static str) -> ThreadRef {
        Thread::new(name, idle, 0x55, ThreadPriority::DEFAULT)
    }

    #[test]
    fn new_thread_is_created_with_arg() {
        let t = spawn("t");
        assert_eq!(t.state(), ThreadState::Created);
        assert_eq!(t.entry_slot(), EntrySlot::Arg(0x55));
        assert_eq!(t.stack().size(), THREAD_STACK_SIZE);
        assert!(t.task().is_none());
        assert!(!t.is_linked());

        let ctx = unsafe { t.context() };
        assert_eq!(ctx.sp as usize, t.stack().top() & !0xf);
        assert_eq!(ctx.lr as usize, idle as usize);
    }

    #[test]
    fn ids_are_unique_and_resolvable() {
        let a = spawn("a");
        let b = spawn("b");
        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(&lookup_thread(a.id()).unwrap(), &a));

        let id = b.id();
        drop(b);
        assert!(lookup_thread(id).is_none());
    }

    #[test]
    fn state_machine_rejects_illegal_steps() {
        let t = spawn("t");
        assert_eq!(
            t.transition(ThreadState::Exited),
            Err(TinyError::InvalidTransition {
                from: ThreadState::Created,
                to: ThreadState::Exited,
            })
        );
        assert_eq!(t.start(), Ok(0x55));
        t.transition(ThreadState::Sleeping).unwrap();
        t.transition(ThreadState::Running).unwrap();
        t.transition(ThreadState::Waiting).unwrap();
        t.transition(ThreadState::Running).unwrap();
        assert_eq!(t.exit(1).unwrap().map(|j| j.id()), None);

        for to in [
            ThreadState::Created,
            ThreadState::Running,
            ThreadState::Waiting,
            ThreadState::Sleeping,
            ThreadState::Exited,
        ] {
            assert!(t.transition(to).is_err());
        }
        assert_eq!(t.state(), ThreadState::Exited);
    }

    #[test]
    fn joiner_receives_exit_value_once() {
        let target = spawn("target");
        let joiner = spawn("joiner");
        let late = spawn("late");
        for t in [&target, &joiner, &late] {
            t.start().unwrap();
        }
        assert_eq!(target.join_by(&joiner), Ok(None));
        assert_eq!(target.join_by(&late), Err(TinyError::Busy));
        assert!(Arc::ptr_eq(&target.joined().unwrap(), &joiner));

        let woken = target.exit(0xabc).unwrap().unwrap();
        assert!(Arc::ptr_eq(&woken, &joiner));
        assert_eq!(target.entry_slot(), EntrySlot::Empty);
        assert_eq!(joiner.take_join_value(), Some(0xabc));
        assert_eq!(joiner.take_join_value(), None);
    }

    #[test]
    fn join_after_exit_moves_value() {
        let target = spawn("target");
        let first = spawn("first");
        target.start().unwrap();
        first.start().unwrap();
        target.exit(7).unwrap();
        assert_eq!(target.entry_slot(), EntrySlot::Ret(7));

        assert_eq!(target.join_by(&first), Ok(Some(7)));
        drop(first);

        // The joiner is gone, but the value was already consumed.
        let second = spawn("second");
        second.start().unwrap();
        assert_eq!(target.join_by(&second), Err(TinyError::Busy));
    }

    #[test]
    fn joiner_must_be_running() {
        let target = spawn("target");
        target.start().unwrap();

        // An exited joiner keeps its own return value.
        let finished = spawn("finished");
        finished.start().unwrap();
        finished.exit(9).unwrap();
        assert_eq!(target.join_by(&finished), Err(TinyError::InvalidArgument));
        assert_eq!(finished.entry_slot(), EntrySlot::Ret(9));

        // A joiner that never ran keeps its entry argument.
        let fresh = spawn("fresh");
        assert_eq!(target.join_by(&fresh), Err(TinyError::InvalidArgument));
        assert_eq!(fresh.entry_slot(), EntrySlot::Arg(0x55));
        assert!(target.joined().is_none());

        target.exit(3).unwrap();
        assert_eq!(fresh.start(), Ok(0x55));
        assert_eq!(finished.entry_slot(), EntrySlot::Ret(9));
        assert_eq!(target.join_by(&fresh), Ok(Some(3)));
    }

    #[test]
    fn start_without_argument_is_an_error() {
        let t = spawn("t");
        assert_eq!(t.start(), Ok(0x55));
        assert_eq!(t.start(), Err(TinyError::Busy));
        assert_eq!(t.state(), ThreadState::Running);
    }

    #[test]
    fn self_join_is_rejected() {
        let t = spawn("t");
        assert_eq!(t.join_by(&t), Err(TinyError::InvalidArgument));
        assert!(t.joined().is_none());
    }
}
