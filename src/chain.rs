// Intrusive circular doubly-linked list.
//
// Nodes are embedded in their payload type; the list owns only a sentinel.
// Links are `Cell`s so splicing works through shared references (needed from
// callbacks and critical sections). Null links mean "detached" — a node
// self-links lazily the moment it participates in a chain.
//
// The list never owns payload lifetimes. A node linked into a chain must
// outlive its membership and keep its address (links are raw pointers);
// dropping a still-attached node is a usage fault.

use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr;

use crate::fault::{self, Fault};

/// One link of a circular chain. Embed as the first field of the payload
/// type (`#[repr(C)]`) and implement [`ChainItem`] to get typed access.
pub struct ChainNode {
    next: Cell<*const ChainNode>,
    prev: Cell<*const ChainNode>,
}

impl ChainNode {
    pub const fn new() -> Self {
        Self {
            next: Cell::new(ptr::null()),
            prev: Cell::new(ptr::null()),
        }
    }

    /// True when this node participates in no chain but its own.
    pub fn is_detached(&self) -> bool {
        let next = self.next.get();
        next.is_null() || ptr::eq(next, self)
    }

    /// Successor link; the node itself when detached.
    pub fn next_ptr(&self) -> *const ChainNode {
        let next = self.next.get();
        if next.is_null() {
            self as *const ChainNode
        } else {
            next
        }
    }

    /// Predecessor link; the node itself when detached.
    pub fn prev_ptr(&self) -> *const ChainNode {
        let prev = self.prev.get();
        if prev.is_null() {
            self as *const ChainNode
        } else {
            prev
        }
    }

    fn circle(&self) {
        if self.next.get().is_null() {
            let me = self as *const ChainNode;
            self.next.set(me);
            self.prev.set(me);
        }
    }

    /// Unhook from the current chain without resetting own links.
    fn unlink(&self) {
        if !self.is_detached() {
            // Safety: attached nodes always have live, well-formed neighbors;
            // the circular invariant is maintained by every splice below.
            unsafe {
                (*self.prev.get()).next.set(self.next.get());
                (*self.next.get()).prev.set(self.prev.get());
            }
        }
    }

    /// Splice out of whatever chain this node is in. No-op when detached.
    pub fn detach(&self) {
        self.unlink();
        self.next.set(ptr::null());
        self.prev.set(ptr::null());
    }

    /// Insert `node` directly before `self` (so `node` becomes our
    /// predecessor), detaching it from any previous chain first.
    pub fn insert_before(&self, node: &ChainNode) {
        if ptr::eq(node, self) {
            return;
        }
        self.circle();
        node.unlink();
        let me = self as *const ChainNode;
        let prev = self.prev.get();
        node.prev.set(prev);
        node.next.set(me);
        // Safety: `prev` is non-null after `circle`.
        unsafe {
            (*prev).next.set(node as *const ChainNode);
        }
        self.prev.set(node as *const ChainNode);
    }

    /// Insert `node` directly after `self`, detaching it first.
    pub fn insert_after(&self, node: &ChainNode) {
        self.circle();
        // Safety: next is non-null after `circle`.
        unsafe { (*self.next.get()).insert_before(node) }
    }
}

impl Drop for ChainNode {
    fn drop(&mut self) {
        // A node dying inside a chain leaves dangling links behind it.
        if !self.is_detached() {
            fault::raise(Fault::Queue);
        }
    }
}

/// Typed view of a [`ChainNode`]-bearing payload.
///
/// # Safety
///
/// `from_node` must invert `node`: for every `item`,
/// `from_node(item.node())` yields `item`. The usual implementation puts the
/// node as the first field of a `#[repr(C)]` struct and casts the pointer.
pub unsafe trait ChainItem: Sized {
    fn node(&self) -> &ChainNode;
    unsafe fn from_node(node: *const ChainNode) -> *const Self;
}

/// Intrusive list: a sentinel plus typed insert/remove/iterate.
pub struct Chain<T: ChainItem> {
    head: ChainNode,
    _items: PhantomData<*const T>,
}

impl<T: ChainItem> Chain<T> {
    pub const fn new() -> Self {
        Self {
            head: ChainNode::new(),
            _items: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_detached()
    }

    pub(crate) fn sentinel(&self) -> &ChainNode {
        &self.head
    }

    pub fn push_front(&self, item: &T) {
        self.head.insert_after(item.node());
    }

    pub fn push_back(&self, item: &T) {
        self.head.insert_before(item.node());
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        // Safety: non-empty list heads are payload nodes, per ChainItem.
        unsafe { Some(&*T::from_node(self.head.next_ptr())) }
    }

    /// Detach and return the first item, if any.
    pub fn pop_front(&self) -> Option<&T> {
        let item = self.front()?;
        item.node().detach();
        Some(item)
    }

    /// Detach and return the last item, if any.
    pub fn pop_back(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        // Safety: as in `front`.
        let item = unsafe { &*T::from_node(self.head.prev_ptr()) };
        item.node().detach();
        Some(item)
    }

    /// Iterate front to back. The iterator advances before yielding, so the
    /// yielded item may be detached without disturbing the traversal.
    pub fn iter(&self) -> ChainIter<'_, T> {
        self.head.circle();
        ChainIter {
            current: self.head.next_ptr(),
            end: &self.head as *const ChainNode,
            _items: PhantomData,
        }
    }
}

pub struct ChainIter<'c, T: ChainItem> {
    current: *const ChainNode,
    end: *const ChainNode,
    _items: PhantomData<&'c T>,
}

impl<'c, T: ChainItem> Iterator for ChainIter<'c, T> {
    type Item = &'c T;

    fn next(&mut self) -> Option<&'c T> {
        if ptr::eq(self.current, self.end) {
            return None;
        }
        let node = self.current;
        // Safety: `node` is a live payload node between sentinel bounds.
        unsafe {
            self.current = (*node).next_ptr();
            Some(&*T::from_node(node))
        }
    }
}
