/// Elapsed-time gate: due on the first call, then once every `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periodic {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl Periodic {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn due(&mut self, now_ms: u64) -> bool {
        let due = match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if due {
            self.last_ms = Some(now_ms);
        }
        due
    }
}

/// Change detector that invokes its callback whenever the watched value
/// differs from the last one delivered.
///
/// The callback reports whether the value got through. Undelivered values
/// are offered again on the next tick.
pub struct Watch<T> {
    value: Option<T>,
    callback: Box<dyn FnMut(&T) -> bool + Send>,
}

impl<T: Clone + PartialEq> Watch<T> {
    pub fn new(callback: impl FnMut(&T) -> bool + Send + 'static) -> Self {
        Self {
            value: None,
            callback: Box::new(callback),
        }
    }

    pub fn tick(&mut self, value: T) {
        if self.value.as_ref() == Some(&value) {
            return;
        }
        if (self.callback)(&value) {
            self.value = Some(value);
        }
    }

    /// Fires again with the last value, e.g. after a reconnect. Does nothing
    /// before the first delivery.
    pub fn force_fire(&mut self) {
        if let Some(value) = &self.value {
            if !(self.callback)(value) {
                self.value = None;
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch").field("value", &self.value).finish()
    }
}
