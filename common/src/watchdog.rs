use tracing::warn;

/// Trips once health has been continuously bad for `timeout_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthWatchdog {
    timeout_ms: u64,
    unhealthy_since_ms: Option<u64>,
}

impl HealthWatchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            unhealthy_since_ms: None,
        }
    }

    /// Returns true when the process should give up and restart.
    pub fn update(&mut self, healthy: bool, now_ms: u64) -> bool {
        if healthy {
            self.unhealthy_since_ms = None;
            return false;
        }
        let since = *self.unhealthy_since_ms.get_or_insert_with(|| {
            warn!("health check failing");
            now_ms
        });
        now_ms.saturating_sub(since) >= self.timeout_ms
    }
}
