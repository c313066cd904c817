// Capturing closure -> plain function pointer, without a heap.
//
// Some APIs only accept a C-style function pointer and offer nowhere to hang
// state. A `callback_slots!` pool turns a capturing closure into such a
// pointer: the macro declares a static pool of cells, each cell paired with
// its own trampoline function that knows the cell's index. Arming a callback
// moves the closure into a free cell and hands back that cell's trampoline.
//
// Cells are single-shot by default: the trampoline moves the closure onto
// the invoking stack and frees the cell *before* running it, so the closure
// may immediately arm a replacement from the same pool. The extended form
// keeps the cell alive across calls until the closure calls
// `CallbackLifetime::dispose` on itself.
//
// Pool pops and pushes run under the critical section, so callbacks may be
// armed from interrupt context.

use core::cell::{Cell, UnsafeCell};
use core::mem::{self, MaybeUninit};
use core::ptr;

use crate::fault::{self, Fault};

/// Handed to an extended closure on every call; `dispose` marks the cell
/// for release once the call returns.
pub struct CallbackLifetime {
    disposed: Cell<bool>,
}

impl CallbackLifetime {
    fn new() -> Self {
        Self {
            disposed: Cell::new(false),
        }
    }

    /// Release this callback's cell after the current call returns.
    /// The caller must guarantee the trampoline is never invoked again.
    pub fn dispose(&self) {
        self.disposed.set(true);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

/// How to run and destroy the closure currently occupying a cell.
struct CellVtable<A, R> {
    invoke: fn(*mut u8, &CallbackLifetime, A) -> R,
    drop: fn(*mut u8),
    oneshot: bool,
}

impl<A, R> Clone for CellVtable<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A, R> Copy for CellVtable<A, R> {}

fn invoke_once<A, R, F: FnOnce(A) -> R>(store: *mut u8, _lifetime: &CallbackLifetime, arg: A) -> R {
    // Safety: the single-shot path copies the closure onto the invoking
    // stack before calling; `store` points at that by-value copy.
    let f = unsafe { (store as *mut F).read() };
    f(arg)
}

fn invoke_extended<A, R, F: FnMut(&CallbackLifetime, A) -> R>(
    store: *mut u8,
    lifetime: &CallbackLifetime,
    arg: A,
) -> R {
    // Safety: `store` points at the closure living in the cell. Re-invoking
    // the same trampoline from inside the closure is forbidden by contract.
    let f = unsafe { &mut *(store as *mut F) };
    f(lifetime, arg)
}

fn drop_in_store<F>(store: *mut u8) {
    // Safety: called exactly once, on a store known to hold an `F`.
    unsafe { ptr::drop_in_place(store as *mut F) }
}

/// One pool cell: the cell's own trampoline, the occupant vtable (`None`
/// when free), a free-list link, and word-aligned closure storage.
pub struct CallCell<P, A, R, const WORDS: usize> {
    trampoline: P,
    vtable: Cell<Option<CellVtable<A, R>>>,
    next: Cell<*const CallCell<P, A, R, WORDS>>,
    store: UnsafeCell<MaybeUninit<[usize; WORDS]>>,
}

impl<P, A, R, const WORDS: usize> CallCell<P, A, R, WORDS> {
    pub const fn new(trampoline: P) -> Self {
        Self {
            trampoline,
            vtable: Cell::new(None),
            next: Cell::new(ptr::null()),
            store: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Static pool of callback cells; declare with [`callback_slots!`].
///
/// `P` is the produced pointer type (`fn(A) -> R`), `WORDS` the closure
/// capacity per cell in machine words.
pub struct CallbackSlots<P, A, R, const WORDS: usize, const N: usize> {
    cells: [CallCell<P, A, R, WORDS>; N],
    free: Cell<*const CallCell<P, A, R, WORDS>>,
    primed: Cell<bool>,
}

// Safety: all pool mutation happens under the critical section; occupied
// cells are only touched through their unique trampoline. Closures are
// required to be `Send` so parking them in a shared static is sound.
unsafe impl<P, A, R, const WORDS: usize, const N: usize> Sync for CallbackSlots<P, A, R, WORDS, N> {}

impl<P: Copy, A, R, const WORDS: usize, const N: usize> CallbackSlots<P, A, R, WORDS, N> {
    pub const fn new(cells: [CallCell<P, A, R, WORDS>; N]) -> Self {
        Self {
            cells,
            free: Cell::new(ptr::null()),
            primed: Cell::new(false),
        }
    }

    /// Cells currently free (diagnostic).
    pub fn free_cells(&self) -> usize {
        critical_section::with(|_| {
            if !self.primed.get() {
                self.prime();
            }
            let mut count = 0;
            let mut cursor = self.free.get();
            while !cursor.is_null() {
                count += 1;
                // Safety: free-list links only point at cells of this pool.
                cursor = unsafe { (*cursor).next.get() };
            }
            count
        })
    }

    /// Arm a single-shot callback: the returned pointer may be called
    /// exactly once, and the cell frees itself on that call. Faults when
    /// the pool is exhausted.
    pub fn once<F>(&'static self, f: F) -> P
    where
        F: FnOnce(A) -> R + Send + 'static,
    {
        self.arm(
            f,
            CellVtable {
                invoke: invoke_once::<A, R, F>,
                drop: drop_in_store::<F>,
                oneshot: true,
            },
        )
    }

    /// Arm a long-lived callback. The closure receives a
    /// [`CallbackLifetime`] first; the cell stays armed until the closure
    /// calls `dispose` on it. Faults when the pool is exhausted.
    pub fn extended<F>(&'static self, f: F) -> P
    where
        F: FnMut(&CallbackLifetime, A) -> R + Send + 'static,
    {
        self.arm(
            f,
            CellVtable {
                invoke: invoke_extended::<A, R, F>,
                drop: drop_in_store::<F>,
                oneshot: false,
            },
        )
    }

    fn arm<F: 'static>(&'static self, f: F, vtable: CellVtable<A, R>) -> P {
        const {
            assert!(
                mem::size_of::<F>() <= WORDS * mem::size_of::<usize>(),
                "closure does not fit this pool's cells"
            );
            assert!(
                mem::align_of::<F>() <= mem::align_of::<usize>(),
                "closure over-aligned for word storage"
            );
        }
        let popped = critical_section::with(|_| {
            if !self.primed.get() {
                self.prime();
            }
            let cell = self.free.get();
            if cell.is_null() {
                return None;
            }
            // Safety: free-list links only point at cells of this pool.
            unsafe { self.free.set((*cell).next.get()) };
            Some(cell)
        });
        let Some(cell) = popped else {
            fault::raise(Fault::Callback);
        };
        // The cell is exclusively ours until the vtable goes live, and the
        // trampoline cannot run before we hand it out.
        // Safety: store is sized and aligned for `F` (asserted above).
        let cell = unsafe { &*cell };
        unsafe { (cell.store.get() as *mut F).write(f) };
        cell.vtable.set(Some(vtable));
        cell.trampoline
    }

    fn prime(&self) {
        let mut next: *const CallCell<P, A, R, WORDS> = ptr::null();
        for cell in self.cells.iter().rev() {
            cell.next.set(next);
            next = cell as *const _;
        }
        self.free.set(next);
        self.primed.set(true);
    }

    fn push_free(&self, cell: &CallCell<P, A, R, WORDS>) {
        cell.vtable.set(None);
        cell.next.set(self.free.get());
        self.free.set(cell as *const _);
    }

    /// Trampoline entry; called only by `callback_slots!`-generated fns.
    #[doc(hidden)]
    pub fn run(&self, index: usize, arg: A) -> R {
        let cell = &self.cells[index];
        let Some(vtable) = cell.vtable.get() else {
            // Invoked after its single shot or after dispose.
            fault::raise(Fault::Callback);
        };
        if vtable.oneshot {
            let mut moved = MaybeUninit::<[usize; WORDS]>::uninit();
            critical_section::with(|_| {
                // Move the closure out and free the cell first, so the
                // closure body can arm a fresh callback from this pool.
                // Safety: the vtable said occupied; the store holds the
                // closure bytes.
                moved = unsafe { cell.store.get().read() };
                self.push_free(cell);
            });
            let lifetime = CallbackLifetime::new();
            (vtable.invoke)(moved.as_mut_ptr() as *mut u8, &lifetime, arg)
        } else {
            let lifetime = CallbackLifetime::new();
            let result = (vtable.invoke)(cell.store.get() as *mut u8, &lifetime, arg);
            if lifetime.is_disposed() {
                (vtable.drop)(cell.store.get() as *mut u8);
                critical_section::with(|_| self.push_free(cell));
            }
            result
        }
    }
}

/// Declare a static callback pool.
///
/// ```ignore
/// callback_slots!(static ON_DONE: fn(u32) -> (), words = 4, slots = [d0, d1]);
///
/// start_transfer(ON_DONE.once(move |status| log::info!("done: {}", status)));
/// ```
///
/// One cell and one distinct trampoline function are generated per slot
/// token. The signature must be spelled in full (use `-> ()` for unit).
#[macro_export]
macro_rules! callback_slots {
    (static $name:ident: fn($arg:ty) -> $ret:ty, words = $words:literal,
     slots = [$($slot:ident),+ $(,)?]) => {
        static $name: $crate::callback::CallbackSlots<
            fn($arg) -> $ret,
            $arg,
            $ret,
            $words,
            { [$($crate::callback_slots!(@unit $slot)),+].len() },
        > = {
            $crate::callback_slots!(@tramp_arg $name, $arg, $ret, (0usize), $($slot),+);
            $crate::callback::CallbackSlots::new([
                $($crate::callback::CallCell::new($slot as fn($arg) -> $ret)),+
            ])
        };
    };
    (static $name:ident: fn() -> $ret:ty, words = $words:literal,
     slots = [$($slot:ident),+ $(,)?]) => {
        static $name: $crate::callback::CallbackSlots<
            fn() -> $ret,
            (),
            $ret,
            $words,
            { [$($crate::callback_slots!(@unit $slot)),+].len() },
        > = {
            $crate::callback_slots!(@tramp_unit $name, $ret, (0usize), $($slot),+);
            $crate::callback::CallbackSlots::new([
                $($crate::callback::CallCell::new($slot as fn() -> $ret)),+
            ])
        };
    };

    (@tramp_arg $name:ident, $arg:ty, $ret:ty, ($idx:expr), $slot:ident $(, $rest:ident)*) => {
        #[allow(non_snake_case)]
        fn $slot(arg: $arg) -> $ret {
            $name.run($idx, arg)
        }
        $crate::callback_slots!(@tramp_arg $name, $arg, $ret, ($idx + 1usize), $($rest),*);
    };
    (@tramp_arg $name:ident, $arg:ty, $ret:ty, ($idx:expr),) => {};

    (@tramp_unit $name:ident, $ret:ty, ($idx:expr), $slot:ident $(, $rest:ident)*) => {
        #[allow(non_snake_case)]
        fn $slot() -> $ret {
            $name.run($idx, ())
        }
        $crate::callback_slots!(@tramp_unit $name, $ret, ($idx + 1usize), $($rest),*);
    };
    (@tramp_unit $name:ident, $ret:ty, ($idx:expr),) => {};

    (@unit $slot:ident) => {
        ()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn single_shot_runs_and_frees() {
        callback_slots!(static POOL: fn(u32) -> u32, words = 4, slots = [a, b]);

        assert_eq!(POOL.free_cells(), 2);
        let offset = 100u32;
        let cb = POOL.once(move |x| x + offset);
        assert_eq!(POOL.free_cells(), 1);
        assert_eq!(cb(1), 101);
        // The shot released its cell.
        assert_eq!(POOL.free_cells(), 2);
    }

    #[test]
    fn two_pending_shots_keep_their_own_captures() {
        callback_slots!(static POOL: fn(u32) -> u32, words = 4, slots = [a, b]);

        let first = POOL.once(move |x| x + 1);
        let second = POOL.once(move |x| x + 2);
        assert_ne!(first as usize, second as usize);
        assert_eq!(second(10), 12);
        assert_eq!(first(10), 11);
    }

    #[test]
    fn single_shot_can_rearm_from_its_own_body() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        callback_slots!(static POOL: fn() -> (), words = 2, slots = [only]);

        fn arm() -> fn() {
            POOL.once(move |()| {
                HITS.fetch_add(1, Ordering::Relaxed);
                // The cell was freed before this body ran.
                let _ = arm();
            })
        }

        HITS.store(0, Ordering::Relaxed);
        let cb = arm();
        cb();
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        assert_eq!(POOL.free_cells(), 0);
    }

    #[test]
    fn calling_a_spent_shot_faults() {
        callback_slots!(static POOL: fn(u32) -> u32, words = 2, slots = [a]);

        let cb = POOL.once(move |x| x);
        assert_eq!(cb(7), 7);
        let err = std::panic::catch_unwind(|| cb(8));
        assert!(err.is_err());
    }

    #[test]
    fn exhaustion_faults() {
        callback_slots!(static POOL: fn(u32) -> u32, words = 2, slots = [a]);

        let _held = POOL.once(move |x| x);
        let err = std::panic::catch_unwind(|| POOL.once(move |x| x + 1));
        assert!(err.is_err());
    }

    #[test]
    fn extended_lives_until_disposed() {
        static DROPS: AtomicU32 = AtomicU32::new(0);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        callback_slots!(static POOL: fn(u32) -> u32, words = 4, slots = [a]);

        let keep = Tracked;
        let mut calls = 0u32;
        let cb = POOL.extended(move |lifetime, x| {
            let _ = &keep;
            calls += 1;
            if x == 0 {
                lifetime.dispose();
            }
            calls
        });

        assert_eq!(cb(5), 1);
        assert_eq!(cb(5), 2);
        assert_eq!(POOL.free_cells(), 0);
        assert_eq!(DROPS.load(Ordering::Relaxed), 0);

        // The disposing call still completes, then releases the cell and
        // drops the captures.
        assert_eq!(cb(0), 3);
        assert_eq!(POOL.free_cells(), 1);
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }
}
