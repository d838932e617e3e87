//! Sliding-window admission limiter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Caps how many job starts may begin within a sliding time window,
/// system-wide. Concurrency is bounded separately by the worker pool
/// size; this protects the upstream model's request-rate limits.
pub struct AdmissionLimiter {
    max_starts: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl AdmissionLimiter {
    pub fn new(max_starts: usize, window: Duration) -> Self {
        Self {
            max_starts: max_starts.max(1),
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a start slot is free within the window, then claim it.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while let Some(front) = starts.front() {
                    if now.duration_since(*front) >= self.window {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if starts.len() < self.max_starts {
                    starts.push_back(now);
                    return;
                }
                // Window is full; the oldest start ages out first.
                let oldest = *starts.front().expect("non-empty when full");
                self.window - now.duration_since(oldest)
            };
            debug!(wait_ms = wait.as_millis() as u64, "admission window full, waiting");
            sleep(wait).await;
        }
    }

    /// Starts currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut starts = self.starts.lock();
        let now = Instant::now();
        while let Some(front) = starts.front() {
            if now.duration_since(*front) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }
        starts.len()
    }
}
