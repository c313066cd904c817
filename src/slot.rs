// In-place single-value lifetime manager.
//
// A typed, aligned buffer plus an occupancy flag, with construction and
// destruction as explicit operations. Useful for state that must outlive a
// lexical scope (fields of coroutines and tasks whose lifetime brackets a
// suspension point) and for late-initialized driver objects.

use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};

use crate::fault::{self, Fault};

/// Explicitly managed storage for exactly one `T`.
pub struct Slot<T> {
    value: MaybeUninit<T>,
    present: bool,
}

impl<T> Slot<T> {
    pub const fn new() -> Self {
        Self {
            value: MaybeUninit::uninit(),
            present: false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.present
    }

    /// Construct in place. Faults when already occupied.
    pub fn emplace(&mut self, value: T) -> &mut T {
        if self.present {
            fault::raise(Fault::Memory);
        }
        self.present = true;
        self.value.write(value)
    }

    /// Construct in place, destroying any previous occupant first.
    pub fn force(&mut self, value: T) -> &mut T {
        self.destroy();
        self.present = true;
        self.value.write(value)
    }

    /// Return the occupant, constructing it on first call.
    pub fn singleton_with(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.present {
            self.present = true;
            self.value.write(init());
        }
        // Safety: occupied either way by now.
        unsafe { self.value.assume_init_mut() }
    }

    /// Destroy the occupant if present; no-op otherwise.
    pub fn destroy(&mut self) {
        if self.present {
            self.present = false;
            // Safety: flag said occupied, and we cleared it first so a
            // panicking destructor cannot cause a double drop.
            unsafe { self.value.assume_init_drop() };
        }
    }

    /// Destroy the occupant; faults when the slot is empty.
    pub fn destroy_or_panic(&mut self) {
        if !self.present {
            fault::raise(Fault::Memory);
        }
        self.destroy();
    }

    /// Move the occupant out, if any.
    pub fn take(&mut self) -> Option<T> {
        if !self.present {
            return None;
        }
        self.present = false;
        // Safety: flag said occupied.
        Some(unsafe { self.value.assume_init_read() })
    }

    pub fn get(&self) -> Option<&T> {
        if self.present {
            // Safety: flag says occupied.
            Some(unsafe { self.value.assume_init_ref() })
        } else {
            None
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.present {
            // Safety: flag says occupied.
            Some(unsafe { self.value.assume_init_mut() })
        } else {
            None
        }
    }
}

impl<T> Deref for Slot<T> {
    type Target = T;

    /// Faults when the slot is empty.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => fault::raise(Fault::Memory),
        }
    }
}

impl<T> DerefMut for Slot<T> {
    fn deref_mut(&mut self) -> &mut T {
        if !self.present {
            fault::raise(Fault::Memory);
        }
        // Safety: occupied, just checked.
        unsafe { self.value.assume_init_mut() }
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Brackets a slot's occupancy over a region: emplaces on creation,
/// destroys on drop. The slot itself may live anywhere (typically a
/// coroutine field), so the managed lifetime can span suspension points the
/// guard's own scope does not.
pub struct ScopedSlot<'s, T> {
    slot: &'s mut Slot<T>,
}

impl<'s, T> ScopedSlot<'s, T> {
    pub fn new(slot: &'s mut Slot<T>, value: T) -> Self {
        slot.emplace(value);
        Self { slot }
    }
}

impl<T> Deref for ScopedSlot<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.slot
    }
}

impl<T> DerefMut for ScopedSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.slot
    }
}

impl<T> Drop for ScopedSlot<'_, T> {
    fn drop(&mut self) {
        self.slot.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn emplace_then_access() {
        let mut slot = Slot::<u32>::new();
        assert!(!slot.is_occupied());
        slot.emplace(41u32);
        assert!(slot.is_occupied());
        *slot += 1;
        assert_eq!(*slot, 42);
    }

    #[test]
    fn emplace_over_occupied_faults() {
        let err = std::panic::catch_unwind(|| {
            let mut slot = Slot::<u8>::new();
            slot.emplace(1u8);
            slot.emplace(2u8);
        });
        assert!(err.is_err());
    }

    #[test]
    fn force_replaces() {
        static DROPS: AtomicU32 = AtomicU32::new(0);
        struct Tracked(u32);
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut slot = Slot::<Tracked>::new();
        slot.force(Tracked(1));
        assert_eq!(DROPS.load(Ordering::Relaxed), 0);
        slot.force(Tracked(2));
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
        assert_eq!(slot.get().unwrap().0, 2);
        slot.destroy();
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn singleton_constructs_once() {
        let mut slot = Slot::<u32>::new();
        assert_eq!(*slot.singleton_with(|| 5u32), 5);
        assert_eq!(*slot.singleton_with(|| 99u32), 5);
    }

    #[test]
    fn destroy_is_idempotent_deref_is_not() {
        let mut slot = Slot::<i16>::new();
        slot.emplace(7i16);
        slot.destroy();
        slot.destroy();
        assert!(slot.get().is_none());

        let err = std::panic::catch_unwind(move || *slot);
        assert!(err.is_err());
    }

    #[test]
    fn destroy_or_panic_on_empty_faults() {
        let err = std::panic::catch_unwind(|| {
            let mut slot = Slot::<u8>::new();
            slot.destroy_or_panic();
        });
        assert!(err.is_err());
    }

    #[test]
    fn take_moves_the_value_out() {
        let mut slot = Slot::<String>::new();
        slot.emplace(String::from("moved"));
        assert_eq!(slot.take().as_deref(), Some("moved"));
        assert!(slot.take().is_none());
    }

    #[test]
    fn scoped_slot_brackets_occupancy() {
        let mut slot = Slot::new();
        {
            let mut guard = ScopedSlot::new(&mut slot, 10u32);
            *guard += 1;
            assert_eq!(*guard, 11);
        }
        assert!(!slot.is_occupied());
    }
}
