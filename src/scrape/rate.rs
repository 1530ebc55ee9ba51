//! Navigation-start rate limiting
//!
//! The rate gate bounds how many navigations may start per time window,
//! independent of how many targets are in flight. The coordinator admits
//! targets through the gate in submission order, so the limit also
//! preserves dispatch fairness.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter over navigation starts
pub struct RateGate {
    max_starts: u32,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateGate {
    pub fn new(max_starts: u32, window: Duration) -> Self {
        Self {
            max_starts,
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a navigation may start, then records the start
    ///
    /// Sleeps exactly until the oldest start in the window expires rather
    /// than polling.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();

                while let Some(oldest) = starts.front() {
                    if now.duration_since(*oldest) >= self.window {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }

                if (starts.len() as u32) < self.max_starts {
                    starts.push_back(now);
                    return;
                }

                // Full window; the front entry is the next to expire.
                match starts.front() {
                    Some(oldest) => self.window - now.duration_since(*oldest),
                    None => Duration::ZERO,
                }
            };

            tokio::time::sleep(wait).await;
        }
    }
}
