// Cooperative tasks: coroutines that publish through a thenable.
//
// A task's yields do not return to the resumer; they resolve the task's own
// thenable, and the task can suspend awaiting somebody else's. `resume`
// returns the task's thenable, and the caller must use it (`then` a handler
// or await it from another task) — that is the only way to learn when the
// task yields next.
//
// The delicate part is symmetric transfer. A handler invoked from inside a
// yield may resume the same task before the yield returns. Running the body
// recursively would stack up frames without bound, so the task marks itself
// before issuing the callback; the nested resume sees the mark, records
// "resumed" and returns the thenable without executing. Back in the yield,
// the mark is checked: if a nested resume happened, the dispatch loop just
// continues into the saved place — same linear control flow, no recursion.
//
// Body shape (place ids as in `coro`):
//
//     fn resume(&self) -> &Thenable<'a, u32> {
//         if !self.core.enter() {
//             return self.core.thenable();
//         }
//         let me = self.me.get();
//         loop {
//             match self.core.resume_point() {
//                 0 | 1 => {
//                     // yield: break to suspend, continue on nested resume
//                     if self.core.yield_value(1, self.next.get()) {
//                         break;
//                     }
//                 }
//                 2 => { /* ... */ }
//                 p => self.core.invalid(p),
//             }
//         }
//         self.core.thenable()
//     }

use core::cell::Cell;

use crate::coro::CoroState;
use crate::delegate::{Delegate, EventCallback};
use crate::fault::{self, Fault};
use crate::thenable::{EventSlot, Thenable};

/// Recursion guard across mutual resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    /// Suspended; the next `enter` runs the body.
    Ready,
    /// Body executing right now.
    Busy,
    /// Body executing and currently inside a yield/await callback; a
    /// nested resume must not re-enter.
    InCallback,
    /// A nested resume arrived during the callback; the outer frame
    /// continues instead of suspending.
    ResumedInCallback,
}

/// The task-protocol state every cooperative task embeds: coroutine place,
/// recursion guard, and the task's own thenable.
pub struct TaskCore<'a, T> {
    state: CoroState,
    run: Cell<RunState>,
    thenable: Thenable<'a, T>,
}

impl<'a, T> TaskCore<'a, T> {
    pub const fn new() -> Self {
        Self {
            state: CoroState::new(),
            run: Cell::new(RunState::Ready),
            thenable: Thenable::new(),
        }
    }

    /// The thenable this task yields through.
    pub fn thenable(&self) -> &Thenable<'a, T> {
        &self.thenable
    }

    pub fn finished(&self) -> bool {
        self.state.finished()
    }

    /// Gate at the top of `resume`. True: proceed into the dispatch loop.
    /// False: this is a nested resume from inside our own callback — the
    /// caller returns the thenable immediately, and the outer frame
    /// continues for us. Resuming a task that is plainly executing faults.
    pub fn enter(&self) -> bool {
        let verdict = critical_section::with(|_| match self.run.get() {
            RunState::Ready => {
                self.run.set(RunState::Busy);
                Some(true)
            }
            RunState::InCallback => {
                self.run.set(RunState::ResumedInCallback);
                Some(false)
            }
            RunState::Busy | RunState::ResumedInCallback => None,
        });
        match verdict {
            Some(proceed) => proceed,
            None => fault::raise(Fault::Task),
        }
    }

    /// The place to dispatch on. Faults when the task already stopped.
    pub fn resume_point(&self) -> u16 {
        if self.state.finished() {
            fault::raise(Fault::Task);
        }
        self.state.resume_point()
    }

    /// Dispatch landed on an undefined place id.
    pub fn invalid(&self, _place: u16) -> ! {
        fault::raise(Fault::Task);
    }

    /// Yield `value` through the task's thenable from place `next_place`.
    /// Returns true when the task stays suspended (break out of the
    /// dispatch loop); false when a subscriber resumed us synchronously
    /// (continue the loop — it re-enters at `next_place`).
    pub fn yield_value(&self, next_place: u16, value: T) -> bool {
        self.state.suspend(next_place);
        self.begin_callback();
        self.thenable.resolve(value);
        self.end_callback_suspends()
    }

    /// Suspend until `other` resolves. `deliver` is the delegate `other`
    /// will invoke — typically bound to this task: store the value in a
    /// field, then resume. Returns true when the task stays suspended,
    /// false when `other` resolved synchronously during subscription.
    pub fn await_on<'b, U>(
        &self,
        next_place: u16,
        other: &Thenable<'b, U>,
        deliver: Delegate<'b, U, ()>,
    ) -> bool {
        self.state.suspend(next_place);
        self.begin_callback();
        other.then(deliver);
        self.end_callback_suspends()
    }

    /// Suspend until `other` fires. The event-slot flavor of `await_on`.
    pub fn await_event<'b>(
        &self,
        next_place: u16,
        other: &EventSlot<'b>,
        deliver: EventCallback<'b>,
    ) -> bool {
        self.state.suspend(next_place);
        self.begin_callback();
        other.then(deliver);
        self.end_callback_suspends()
    }

    /// Final stop: no further resume is legal.
    pub fn stop(&self) {
        self.state.finish();
        critical_section::with(|_| self.run.set(RunState::Ready));
    }

    fn begin_callback(&self) {
        critical_section::with(|_| self.run.set(RunState::InCallback));
    }

    /// After the callback returned: did anyone resume us from inside it?
    fn end_callback_suspends(&self) -> bool {
        critical_section::with(|_| {
            if self.run.get() == RunState::ResumedInCallback {
                self.run.set(RunState::Busy);
                false
            } else {
                self.run.set(RunState::Ready);
                true
            }
        })
    }
}

impl<T> Default for TaskCore<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Late-bound long-lived self reference.
///
/// Delegates bound to a task must borrow it for the task's whole region,
/// but inside a handler only a short reborrow of `self` is available. The
/// task stores its own long reference here once, right after construction,
/// and body code reads it back when it needs to mint new delegates.
pub struct SelfHandle<'a, T: ?Sized> {
    target: Cell<Option<&'a T>>,
}

impl<'a, T: ?Sized> SelfHandle<'a, T> {
    pub const fn new() -> Self {
        Self {
            target: Cell::new(None),
        }
    }

    /// Record the long-lived reference. Call once, before the first resume.
    pub fn attach(&self, target: &'a T) {
        self.target.set(Some(target));
    }

    /// The attached reference; faults when `attach` was never called.
    pub fn get(&self) -> &'a T {
        match self.target.get() {
            Some(target) => target,
            None => fault::raise(Fault::Task),
        }
    }
}

impl<T: ?Sized> Default for SelfHandle<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
