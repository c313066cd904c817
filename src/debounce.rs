// Stable-value detection over a chattering boolean source.
//
// Two flavors. `SimpleDebounce` is polled: feed it (tick, raw) samples from
// the main loop and it reports each accepted edge exactly once. A raw value
// must sit different from the stable value for the whole debounce interval
// to be accepted; any sample agreeing with the stable value cancels the
// pending edge (chatter absorbed, the interval restarts from the next
// disagreement).
//
// `DebounceAction` rides a `Scheduler` instead: it samples a delegated
// source every `check_interval` ticks and flips after N consecutive
// disagreeing samples, firing an `on_true`/`on_false` event slot.

use core::cell::Cell;

use crate::delegate::Delegate;
use crate::sched::{ActionNode, Scheduler};
use crate::thenable::EventSlot;
use crate::ticks::Ticks;
use crate::timer::SimpleTimer;

/// Polled debouncer backed by a [`SimpleTimer`].
#[derive(Debug)]
pub struct SimpleDebounce {
    timer: SimpleTimer,
    debounce_ticks: Ticks,
    value: bool,
}

impl SimpleDebounce {
    pub const fn new(initial: bool, debounce_ticks: Ticks) -> Self {
        Self {
            timer: SimpleTimer::new(),
            debounce_ticks,
            value: initial,
        }
    }

    /// The current stable (debounced) value.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Feed one sample. Returns true exactly when the stable value just
    /// changed (edge detection).
    pub fn discover(&mut self, now: Ticks, raw: bool) -> bool {
        if self.timer.is_pending() {
            if raw == self.value {
                // Fell back to the stable value before the interval ran
                // out: chatter, not an edge.
                self.timer.cancel();
            } else if self.timer.discover(now) {
                self.value = raw;
                return true;
            }
        } else if raw != self.value {
            self.timer.start(now, self.debounce_ticks);
        }
        false
    }
}

/// Scheduler-driven debouncer sampling a delegated boolean source.
///
/// While scheduled, the source is polled every `check_interval` ticks; when
/// `samples_to_accept` consecutive polls disagree with the stable value,
/// the value flips and the matching event slot fires.
pub struct DebounceAction<'a> {
    action: ActionNode<'a>,
    source: Delegate<'a, (), bool>,
    check_interval: Ticks,
    samples_to_accept: u32,
    streak: Cell<u32>,
    value: Cell<bool>,
    on_true: EventSlot<'a>,
    on_false: EventSlot<'a>,
}

impl<'a> DebounceAction<'a> {
    pub fn new(
        source: Delegate<'a, (), bool>,
        initial: bool,
        check_interval: Ticks,
        samples_to_accept: u32,
    ) -> Self {
        Self {
            action: ActionNode::new(),
            source,
            check_interval,
            samples_to_accept,
            streak: Cell::new(0),
            value: Cell::new(initial),
            on_true: EventSlot::new(),
            on_false: EventSlot::new(),
        }
    }

    /// The current stable value.
    pub fn value(&self) -> bool {
        self.value.get()
    }

    /// Fires after the stable value flips to true.
    pub fn on_true(&self) -> &EventSlot<'a> {
        &self.on_true
    }

    /// Fires after the stable value flips to false.
    pub fn on_false(&self) -> &EventSlot<'a> {
        &self.on_false
    }

    /// Start periodic sampling on `scheduler`. Call once; rescheduling
    /// moves the sampling to the new scheduler.
    pub fn schedule(&'a self, scheduler: &Scheduler<'a>) {
        self.action.set(Delegate::bind(self, Self::sample));
        self.action
            .schedule_after(scheduler, self.check_interval, self.check_interval);
    }

    /// Stop sampling. The streak resets so a later `schedule` starts clean.
    pub fn cancel(&self) {
        self.action.cancel();
        self.streak.set(0);
    }

    fn sample(&self, _: ()) {
        let raw = self.source.invoke();
        if raw == self.value.get() {
            self.streak.set(0);
            return;
        }
        let streak = self.streak.get() + 1;
        if streak < self.samples_to_accept {
            self.streak.set(streak);
            return;
        }
        self.streak.set(0);
        self.value.set(raw);
        if raw {
            self.on_true.resolve();
        } else {
            self.on_false.resolve();
        }
    }
}
