/// A value paired with the monotonic time it was last set.
///
/// Reading the value never touches the timestamp; only [`Timed::set`] does,
/// even when the new value equals the old one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timed<T> {
    value: T,
    set_ms: u64,
}

impl<T: Copy> Timed<T> {
    pub fn new(value: T, now_ms: u64) -> Self {
        Self {
            value,
            set_ms: now_ms,
        }
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn set(&mut self, value: T, now_ms: u64) {
        self.value = value;
        self.set_ms = now_ms;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.set_ms)
    }

    pub fn is_older_than(&self, timeout_ms: u64, now_ms: u64) -> bool {
        self.age_ms(now_ms) >= timeout_ms
    }
}

impl<T: Copy + PartialEq> Timed<T> {
    /// Sets the value only if it differs, so the age keeps counting from the
    /// last real change. Returns the previous value on change.
    pub fn change(&mut self, value: T, now_ms: u64) -> Option<T> {
        if self.value == value {
            return None;
        }
        let previous = self.value;
        self.set(value, now_ms);
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_counts_from_last_set() {
        let mut value = Timed::new(1.0_f64, 1_000);
        assert_eq!(value.age_ms(1_500), 500);

        value.set(1.0, 2_000);
        assert_eq!(value.age_ms(2_100), 100);
        assert!(value.is_older_than(100, 2_100));
        assert!(!value.is_older_than(101, 2_100));
    }

    #[test]
    fn change_keeps_timestamp_for_equal_values() {
        let mut value = Timed::new(false, 0);
        assert_eq!(value.change(false, 5_000), None);
        assert_eq!(value.age_ms(5_000), 5_000);

        assert_eq!(value.change(true, 6_000), Some(false));
        assert_eq!(value.age_ms(6_000), 0);
    }

    #[test]
    fn clock_going_backwards_saturates() {
        let value = Timed::new(0_u8, 10_000);
        assert_eq!(value.age_ms(9_000), 0);
    }
}
