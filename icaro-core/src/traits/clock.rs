//! Millisecond time source

/// Monotonic millisecond clock
///
/// The counter may wrap; callers compare with `wrapping_sub`.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Milliseconds from `earlier` to `now`, tolerant of counter wrap
pub fn elapsed_ms(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_across_wrap() {
        assert_eq!(elapsed_ms(5, u32::MAX - 4), 10);
        assert_eq!(elapsed_ms(100, 40), 60);
    }
}
