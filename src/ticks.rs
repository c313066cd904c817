// Cyclic tick arithmetic.
//
// Time arrives from the host as an unsigned counter that wraps. Nothing here
// measures time; callers sample their clock and hand the value in. Two
// timestamps are ordered only while they are within half the counter range
// of each other, so every component built on this module requires sampling
// more often than `DELTA_MAX` ticks.

/// Host-supplied monotonic counter value. Units (us, ms, loop iterations)
/// are the caller's choice, per component instance.
pub type Ticks = u32;

/// The widest interval that stays orderable across counter wrap.
pub const DELTA_MAX: Ticks = Ticks::MAX / 2;

/// Cyclic `a < b`: true when `a` comes before `b` on the tick circle.
///
/// Wrapping subtraction turns "a earlier than b" into a difference above
/// `DELTA_MAX`. Results are meaningless when the two stamps are further
/// apart than `DELTA_MAX`.
#[inline]
pub fn ticks_less(a: Ticks, b: Ticks) -> bool {
    a.wrapping_sub(b) > DELTA_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_plain_values() {
        assert!(ticks_less(1, 2));
        assert!(!ticks_less(2, 1));
        assert!(!ticks_less(7, 7));
    }

    #[test]
    fn orders_across_wrap() {
        // 5 ticks after a counter wrap still compares later than just before it.
        assert!(ticks_less(Ticks::MAX - 2, 5));
        assert!(!ticks_less(5, Ticks::MAX - 2));
    }

    #[test]
    fn half_range_is_the_window_edge() {
        assert!(ticks_less(0, DELTA_MAX));
        // Past the window the comparison inverts — the "later" stamp reads
        // as earlier. Callers must sample more often than DELTA_MAX.
        assert!(!ticks_less(0, DELTA_MAX + 2));
    }
}
