// Two-word type-erased callable reference.
//
// A `Delegate` is exactly (caller fn pointer, data word). The caller encodes
// how to reinterpret the word: a plain function pointer, a borrowed functor,
// or a borrowed receiver with a statically bound method. Copying is trivial;
// comparison and equality are defined over the raw two words.
//
// Receivers are shared references — a copyable two-word handle cannot carry
// `&mut` soundly — so bound state mutates through `Cell` interior fields,
// the same way the rest of the crate keeps callback-reachable state.

use core::marker::PhantomData;
use core::mem;
use core::ptr::NonNull;

/// Erased callable with signature `fn(A) -> R`, borrowing its target for `'a`.
pub struct Delegate<'a, A, R = ()> {
    caller: fn(*const (), A) -> R,
    data: *const (),
    _target: PhantomData<&'a ()>,
}

impl<'a, A, R> Delegate<'a, A, R> {
    /// Wrap a plain function pointer. The word stores the function itself.
    pub fn from_fn(f: fn(A) -> R) -> Self {
        fn call_plain<A, R>(data: *const (), arg: A) -> R {
            // Safety: `data` was produced from an `fn(A) -> R` in `from_fn`.
            let f: fn(A) -> R = unsafe { mem::transmute(data) };
            f(arg)
        }
        Self {
            caller: call_plain::<A, R>,
            data: f as usize as *const (),
            _target: PhantomData,
        }
    }

    /// Reference an existing functor. The functor must outlive every call.
    pub fn from_functor<F: Fn(A) -> R>(functor: &'a F) -> Self {
        fn call_functor<A, R, F: Fn(A) -> R>(data: *const (), arg: A) -> R {
            // Safety: `data` points at the `F` borrowed in `from_functor`.
            let f = unsafe { &*(data as *const F) };
            f(arg)
        }
        Self {
            caller: call_functor::<A, R, F>,
            data: functor as *const F as *const (),
            _target: PhantomData,
        }
    }

    /// Bind a receiver and a method statically. `method` must be a
    /// zero-sized fn item (`SomeType::method` or a non-capturing closure):
    /// it is baked into the monomorphized caller so the delegate stays two
    /// words.
    pub fn bind<T, F>(receiver: &'a T, method: F) -> Self
    where
        F: Fn(&T, A) -> R,
    {
        const {
            assert!(
                mem::size_of::<F>() == 0,
                "bound method must be a zero-sized fn item"
            );
        }
        fn call_bound<T, A, R, F: Fn(&T, A) -> R>(data: *const (), arg: A) -> R {
            // Safety: F is zero-sized (asserted above), so a dangling read
            // materializes the very fn item passed to `bind`.
            let method: F = unsafe { NonNull::<F>::dangling().as_ptr().read() };
            // Safety: `data` points at the `T` borrowed in `bind`.
            method(unsafe { &*(data as *const T) }, arg)
        }
        let _ = method;
        Self {
            caller: call_bound::<T, A, R, F>,
            data: receiver as *const T as *const (),
            _target: PhantomData,
        }
    }

    /// Invoke with an argument.
    pub fn call(&self, arg: A) -> R {
        (self.caller)(self.data, arg)
    }

    fn words(&self) -> (usize, usize) {
        (self.caller as usize, self.data as usize)
    }
}

impl<'a, R> Delegate<'a, (), R> {
    /// Invoke an argument-less delegate.
    pub fn invoke(&self) -> R {
        self.call(())
    }
}

/// The ubiquitous "fire an event" shape.
pub type EventCallback<'a> = Delegate<'a, (), ()>;

impl<A, R> Clone for Delegate<'_, A, R> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A, R> Copy for Delegate<'_, A, R> {}

impl<A, R> PartialEq for Delegate<'_, A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.words() == other.words()
    }
}
impl<A, R> Eq for Delegate<'_, A, R> {}

impl<A, R> PartialOrd for Delegate<'_, A, R> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<A, R> Ord for Delegate<'_, A, R> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.words().cmp(&other.words())
    }
}

impl<A, R> core::fmt::Debug for Delegate<'_, A, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (caller, data) = self.words();
        write!(f, "Delegate({:#x}, {:#x})", caller, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    fn double(x: u32) -> u32 {
        x * 2
    }

    #[test]
    fn plain_function() {
        let d = Delegate::from_fn(double);
        assert_eq!(d.call(21), 42);
    }

    #[test]
    fn functor_by_reference() {
        let base = 100u32;
        let add_base = |x: u32| x + base;
        let d = Delegate::from_functor(&add_base);
        assert_eq!(d.call(1), 101);
        assert_eq!(d.call(2), 102);
    }

    struct Counter {
        hits: Cell<u32>,
    }

    impl Counter {
        fn bump(&self, by: u32) -> u32 {
            self.hits.set(self.hits.get() + by);
            self.hits.get()
        }
    }

    #[test]
    fn bound_method() {
        let counter = Counter { hits: Cell::new(0) };
        let d = Delegate::bind(&counter, Counter::bump);
        assert_eq!(d.call(3), 3);
        assert_eq!(d.call(4), 7);
        assert_eq!(counter.hits.get(), 7);
    }

    #[test]
    fn bound_free_function() {
        fn poke(c: &Counter, by: u32) -> u32 {
            c.bump(by + 1)
        }
        let counter = Counter { hits: Cell::new(0) };
        let d = Delegate::bind(&counter, poke);
        assert_eq!(d.call(0), 1);
    }

    #[test]
    fn size_is_two_words() {
        assert_eq!(
            core::mem::size_of::<Delegate<'_, u32, u32>>(),
            2 * core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn equality_tracks_target_and_entry() {
        let a = Counter { hits: Cell::new(0) };
        let b = Counter { hits: Cell::new(0) };
        let d1 = Delegate::bind(&a, Counter::bump);
        let d2 = Delegate::bind(&a, Counter::bump);
        let d3 = Delegate::bind(&b, Counter::bump);
        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
        assert_eq!(Delegate::from_fn(double), Delegate::from_fn(double));
    }

    #[test]
    fn copies_call_the_same_target() {
        let counter = Counter { hits: Cell::new(0) };
        let d = Delegate::bind(&counter, Counter::bump);
        let copy = d;
        copy.call(5);
        d.call(5);
        assert_eq!(counter.hits.get(), 10);
    }

    #[test]
    fn event_callback_invoke() {
        let fired = Cell::new(false);
        let set_true = |()| fired.set(true);
        let cb: EventCallback<'_> = Delegate::from_functor(&set_true);
        cb.invoke();
        assert!(fired.get());
    }
}
