// Unrecoverable-condition reporting.
//
// The library never unwinds on its own behalf: misuse (resuming a finished
// coroutine, freeing a foreign block, ...) funnels into `raise`, which calls
// the host-installed hook. Firmware installs a hook that logs, resets, or
// parks the MCU in a safe state; when nothing is installed we panic so host
// tests and debug builds fail loudly.

use core::cell::Cell;

use critical_section::Mutex;

/// What went wrong. The single-letter tag is stable and cheap to emit on
/// targets where a full panic message costs too much flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Coroutine misuse (resumed after its final yield).
    Coroutine,
    /// Task misuse (resumed while already executing).
    Task,
    /// Memory pool misuse (double emplace, foreign free, exhausted `make`).
    Memory,
    /// Queue misuse (attached intrusive node destroyed).
    Queue,
    /// Trampoline pool exhausted or a freed cell invoked.
    Callback,
}

impl Fault {
    pub const fn tag(self) -> char {
        match self {
            Fault::Coroutine => 'C',
            Fault::Task => 'T',
            Fault::Memory => 'M',
            Fault::Queue => 'Q',
            Fault::Callback => 'B',
        }
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A fault hook must not return.
pub type FaultHook = fn(Fault) -> !;

static HOOK: Mutex<Cell<Option<FaultHook>>> = Mutex::new(Cell::new(None));

/// Install the process-wide fault hook. The last installed hook wins.
pub fn set_fault_hook(hook: FaultHook) {
    critical_section::with(|cs| HOOK.borrow(cs).set(Some(hook)));
}

/// Report an unrecoverable condition. Diverges through the installed hook,
/// or panics when no hook is installed.
pub fn raise(fault: Fault) -> ! {
    let hook = critical_section::with(|cs| HOOK.borrow(cs).get());
    if let Some(hook) = hook {
        hook(fault);
    }
    log::error!("fault '{}'", fault.tag());
    panic!("smol-rt fault '{}'", fault.tag());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_documented_letters() {
        assert_eq!(Fault::Coroutine.tag(), 'C');
        assert_eq!(Fault::Task.tag(), 'T');
        assert_eq!(Fault::Memory.tag(), 'M');
        assert_eq!(Fault::Queue.tag(), 'Q');
        assert_eq!(Fault::Callback.tag(), 'B');
    }

    #[test]
    fn raise_without_hook_panics_with_tag() {
        let err = std::panic::catch_unwind(|| raise(Fault::Memory)).unwrap_err();
        let msg = err.downcast_ref::<String>().cloned().unwrap();
        assert!(msg.contains('M'));
    }
}
