use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Spaces consecutive fetch starts against the source host
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so concurrent fetches queue up behind each other `min_delay` apart
/// without holding the lock across I/O.
#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserves a start slot and returns how long to wait before using it
    pub fn reserve(&self, now: Instant) -> Duration {
        if self.min_delay.is_zero() {
            return Duration::ZERO;
        }

        let mut next_slot = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = match *next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        *next_slot = Some(slot + self.min_delay);

        slot.saturating_duration_since(now)
    }

    /// Waits for the next start slot
    pub async fn wait_turn(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            tracing::trace!("Pacing next request by {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
