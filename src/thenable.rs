// Single-slot resolvable callbacks.
//
// A thenable ties one producer to one consumer without caring who arrives
// first: resolving with no subscriber parks the result, subscribing to a
// parked result redeems it immediately. One redemption per `then` — to see
// further results the consumer subscribes again, which makes these safe to
// re-subscribe from inside the handler itself.
//
// Two shapes, because they store different things:
//   Thenable<T>  — keeps the most recent unconsumed value (one pending
//                  resolution at a time).
//   EventSlot    — value-less events, keeps a count of unconsumed calls.
//
// Handlers always run outside the critical section; the state swap inside
// it is what makes resolve safe to call from interrupt context.

use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;

use crate::delegate::{Delegate, EventCallback};

/// Interior-mutable storage for one pending result.
struct StoredResult<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    present: Cell<bool>,
}

impl<T> StoredResult<T> {
    const fn new() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            present: Cell::new(false),
        }
    }

    fn is_present(&self) -> bool {
        self.present.get()
    }

    /// Store, dropping any previous occupant. Callers serialize access
    /// (critical section); no reference into the storage outlives the call.
    fn force(&self, value: T) {
        self.clear();
        // Safety: not present (just cleared), access serialized by caller.
        unsafe { (*self.value.get()).write(value) };
        self.present.set(true);
    }

    fn take(&self) -> Option<T> {
        if !self.present.get() {
            return None;
        }
        self.present.set(false);
        // Safety: was present; flag cleared before the read's value escapes.
        Some(unsafe { (*self.value.get()).assume_init_read() })
    }

    fn clear(&self) {
        if self.present.get() {
            self.present.set(false);
            // Safety: was present.
            unsafe { (*self.value.get()).assume_init_drop() };
        }
    }

    fn peek_clone(&self) -> Option<T>
    where
        T: Clone,
    {
        if !self.present.get() {
            return None;
        }
        // Safety: present; the clone completes before anything can mutate.
        Some(unsafe { (*self.value.get()).assume_init_ref() }.clone())
    }
}

impl<T> Drop for StoredResult<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Resolvable single-value callback slot.
///
/// The producer calls [`resolve`](Thenable::resolve); the consumer
/// subscribes with [`then`](Thenable::then). Order does not matter: a value
/// resolved early waits (only the most recent one), a handler subscribed
/// early waits for the next resolve.
pub struct Thenable<'a, T> {
    handler: Cell<Option<Delegate<'a, T, ()>>>,
    stored: StoredResult<T>,
}

impl<'a, T> Thenable<'a, T> {
    pub const fn new() -> Self {
        Self {
            handler: Cell::new(None),
            stored: StoredResult::new(),
        }
    }

    /// Start out already subscribed.
    pub fn with_handler(handler: Delegate<'a, T, ()>) -> Self {
        Self {
            handler: Cell::new(Some(handler)),
            stored: StoredResult::new(),
        }
    }

    /// Produce a result: hand it to the subscriber, or park it (replacing
    /// any previous parked value) until one arrives.
    ///
    /// The handler runs with the subscription already cleared, so it may
    /// re-subscribe to this same thenable from its own body.
    pub fn resolve(&self, value: T) {
        let fire = critical_section::with(|_| {
            if let Some(handler) = self.handler.take() {
                Some((handler, value))
            } else {
                self.stored.force(value);
                None
            }
        });
        if let Some((handler, value)) = fire {
            handler.call(value);
        }
    }

    /// Subscribe. A parked result is redeemed immediately (exactly once);
    /// otherwise the handler waits for the next resolve.
    pub fn then(&self, handler: Delegate<'a, T, ()>) {
        let pending = critical_section::with(|_| {
            if let Some(value) = self.stored.take() {
                Some(value)
            } else {
                self.handler.set(Some(handler));
                None
            }
        });
        if let Some(value) = pending {
            handler.call(value);
        }
    }

    /// Subscribe for future resolves only; a parked result is discarded.
    pub fn set(&self, handler: Delegate<'a, T, ()>) {
        critical_section::with(|_| {
            self.stored.clear();
            self.handler.set(Some(handler));
        });
    }

    /// Consume a parked result (if any) without doing anything with it.
    pub fn explicitly_ignore(&self) {
        fn ignore<T>(_: T) {}
        self.then(Delegate::from_fn(ignore::<T>));
    }

    /// Number of resolutions nobody has consumed yet: 0 or 1, since only
    /// the most recent value is kept.
    pub fn untracked_count(&self) -> u32 {
        critical_section::with(|_| u32::from(self.stored.is_present()))
    }

    /// Copy of the parked result, if one is waiting.
    pub fn stored_result(&self) -> Option<T>
    where
        T: Clone,
    {
        critical_section::with(|_| self.stored.peek_clone())
    }

    /// Back to the initial state: no subscriber, nothing parked.
    pub fn reset_callback(&self) {
        critical_section::with(|_| {
            self.handler.set(None);
            self.stored.clear();
        });
    }
}

impl<T> Default for Thenable<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Value-less thenable: an event that counts calls arriving before anyone
/// listens. Each `then` redeems exactly one counted call; the rest persist.
pub struct EventSlot<'a> {
    handler: Cell<Option<EventCallback<'a>>>,
    untracked: Cell<u32>,
}

impl<'a> EventSlot<'a> {
    pub const fn new() -> Self {
        Self {
            handler: Cell::new(None),
            untracked: Cell::new(0),
        }
    }

    /// Start out already subscribed.
    pub fn with_handler(handler: EventCallback<'a>) -> Self {
        Self {
            handler: Cell::new(Some(handler)),
            untracked: Cell::new(0),
        }
    }

    /// Fire: invoke the subscriber (clearing the subscription first), or
    /// count the call for a later `then`.
    pub fn resolve(&self) {
        let handler = critical_section::with(|_| {
            let handler = self.handler.take();
            if handler.is_none() {
                self.untracked.set(self.untracked.get().wrapping_add(1));
            }
            handler
        });
        if let Some(handler) = handler {
            handler.invoke();
        }
    }

    /// Subscribe. One unconsumed call, if any, is redeemed immediately;
    /// otherwise the handler waits for the next resolve.
    pub fn then(&self, handler: EventCallback<'a>) {
        let run_now = critical_section::with(|_| {
            let pending = self.untracked.get();
            if pending > 0 {
                self.untracked.set(pending - 1);
                true
            } else {
                self.handler.set(Some(handler));
                false
            }
        });
        if run_now {
            handler.invoke();
        }
    }

    /// Subscribe for future fires only; accumulated calls are dropped.
    pub fn set(&self, handler: EventCallback<'a>) {
        critical_section::with(|_| {
            self.untracked.set(0);
            self.handler.set(Some(handler));
        });
    }

    /// Swallow one pending call, if any.
    pub fn explicitly_ignore(&self) {
        fn ignore(_: ()) {}
        self.then(Delegate::from_fn(ignore));
    }

    /// Calls that fired with no subscriber and are still unredeemed.
    pub fn untracked_count(&self) -> u32 {
        critical_section::with(|_| self.untracked.get())
    }

    /// Back to the initial state: no subscriber, zero counted calls.
    pub fn reset_callback(&self) {
        critical_section::with(|_| {
            self.handler.set(None);
            self.untracked.set(0);
        });
    }

    /// A delegate that fires this slot and then resets its callback — a
    /// single-shot subscription teardown in one callable.
    pub fn make_unsubscribing_callback(&'a self) -> EventCallback<'a> {
        fn fire_and_reset(slot: &EventSlot<'_>, _arg: ()) {
            slot.resolve();
            slot.reset_callback();
        }
        Delegate::bind(self, fire_and_reset)
    }
}

impl Default for EventSlot<'_> {
    fn default() -> Self {
        Self::new()
    }
}
