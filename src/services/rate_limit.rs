// Shared request gate for metadata APIs.
// One permit per window across every caller holding the same gate.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateGate {
    name: &'static str,
    window: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(name: &'static str, window: Duration) -> Self {
        Self {
            name,
            window,
            last_grant: Mutex::new(None),
        }
    }

    /// Wait until a full window has passed since the previous grant.
    /// Waiters queue on the lock, so a burst of N callers is served strictly
    /// one window apart.
    pub async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.window {
                let wait = self.window - elapsed;
                tracing::debug!("{} rate limit: waiting {:?}", self.name, wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
