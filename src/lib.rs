// smol-rt: minimal no_std cooperative real-time toolkit.
//
// Firmware structured as cooperatively scheduled work reacting to timers,
// debounced inputs, and asynchronous completions — no heap, no kernel. Time
// is whatever monotonic counter the host samples; concurrency is one main
// context plus whatever the platform's critical section keeps at bay.
//
// fault:    tagged unrecoverable-condition hook
// ticks:    cyclic tick arithmetic (wrap-tolerant ordering)
// timer:    one-shot and periodic tick timers
// chain:    intrusive doubly-linked list
// delegate: two-word type-erased callable reference
// pool:     fixed-size block allocator
// slot:     in-place single-value lifetime manager
// callback: capturing closure -> plain fn pointer (static cell pools)
// thenable: single-slot resolvable callbacks (valued + counted-event)
// coro:     stackless coroutines as explicit state machines
// task:     cooperative tasks (yield/await through thenables)
// sched:    tick-driven action scheduler + multicast fan-out
// debounce: stable-value detection over chattering booleans

#![cfg_attr(not(test), no_std)]

pub mod callback;
pub mod chain;
pub mod coro;
pub mod debounce;
pub mod delegate;
pub mod fault;
pub mod pool;
pub mod sched;
pub mod slot;
pub mod task;
pub mod thenable;
pub mod ticks;
pub mod timer;

pub use callback::{CallbackLifetime, CallbackSlots};
pub use chain::{Chain, ChainItem, ChainNode};
pub use coro::{CoroState, Coroutine};
pub use debounce::{DebounceAction, SimpleDebounce};
pub use delegate::{Delegate, EventCallback};
pub use fault::{set_fault_hook, Fault};
pub use pool::BlockPool;
pub use sched::{ActionNode, Multicast, Scheduler};
pub use slot::{ScopedSlot, Slot};
pub use task::{SelfHandle, TaskCore};
pub use thenable::{EventSlot, Thenable};
pub use ticks::{ticks_less, Ticks, DELTA_MAX};
pub use timer::{PeriodicTimer, SimpleTimer};
