//! Intrusive ring of threads.
//!
//! The link lives inside [`Thread`], so joining and leaving a task never
//! allocates. Insertion after a known member and removal of a known member are
//! both O(1).

use alloc::vec::Vec;

use intrusive_collections::{LinkedList, LinkedListAtomicLink, intrusive_adapter};

use super::thread::{Thread, ThreadRef};

intrusive_adapter!(pub ThreadAdapter = ThreadRef: Thread { link => LinkedListAtomicLink });

/// Set of threads linked through their membership links.
///
/// Order carries no scheduling meaning beyond insertion adjacency.
pub struct ThreadRing {
    list: LinkedList<ThreadAdapter>,
}

impl ThreadRing {
    /// Creates an empty ring.
    pub const fn new() -> Self {
        Self {
            list: LinkedList::new(ThreadAdapter::NEW),
        }
    }

    /// Creates a single-element ring holding `anchor`.
    ///
    /// # Panics
    /// Panics if `anchor` is already linked into a ring.
    pub fn init(anchor: ThreadRef) -> Self {
        let mut ring = Self::new();
        ring.list.push_back(anchor);
        ring
    }

    /// Splices `node` in immediately after `anchor`.
    ///
    /// # Safety
    /// `anchor` must be a member of this ring.
    ///
    /// # Panics
    /// Panics if `node` is already linked into a ring.
    pub unsafe fn insert_after(&mut self, node: ThreadRef, anchor: &Thread) {
        let mut cursor = unsafe { self.list.cursor_mut_from_ptr(anchor) };
        cursor.insert_after(node);
    }

    /// Unlinks `node`, closing the ring over the gap, and returns the ring's
    /// reference to it.
    ///
    /// # Safety
    /// `node` must be a member of this ring.
    pub unsafe fn remove(&mut self, node: &Thread) -> Option<ThreadRef> {
        let mut cursor = unsafe { self.list.cursor_mut_from_ptr(node) };
        cursor.remove()
    }

    /// Unlinks and returns every member, in ring order.
    pub fn take_all(&mut self) -> Vec<ThreadRef> {
        let mut members = Vec::new();
        while let Some(thread) = self.list.pop_front() {
            members.push(thread);
        }
        members
    }

    /// Clones out a reference to every member, in ring order.
    pub fn members(&self) -> Vec<ThreadRef> {
        let mut members = Vec::new();
        let mut cursor = self.list.front();
        while let Some(thread) = cursor.clone_pointer() {
            members.push(thread);
            cursor.move_next();
        }
        members
    }

    /// The first member, i.e. the ring anchor.
    pub fn front(&self) -> Option<&Thread> {
        self.list.front().get()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.list.iter()
    }

    /// Number of members. Walks the ring.
    pub fn len(&self) -> usize {
        self.list.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Default for ThreadRing {
    fn default() -> Self {
        Self::new()
    }
}
