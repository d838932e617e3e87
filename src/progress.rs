//! Progress reporting.
//!
//! A synchronous sink interface threaded from the worker into the
//! orchestrator. The worker owns the job-wide 0-100 scale and hands the
//! orchestrator a band-scaled view, so orchestrator progress lands in
//! the middle of the job's range and never regresses.

/// Receives progress updates for one job attempt.
pub trait ProgressSink: Send + Sync {
    /// Report progress in percent (0-100) with a short human message.
    fn report(&self, percent: u8, message: &str);
}

/// Discards all updates. Useful for callers that do not track progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Rescales an inner 0-100 range into the `[lo, hi]` band of an outer
/// sink. The worker reserves `[0, 20)` for setup and `[90, 100]` for
/// persistence, forwarding orchestrator progress through a
/// `ScaledSink::new(sink, 20, 90)`.
pub struct ScaledSink<'a> {
    inner: &'a dyn ProgressSink,
    lo: u8,
    hi: u8,
}

impl<'a> ScaledSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink, lo: u8, hi: u8) -> Self {
        debug_assert!(lo <= hi && hi <= 100);
        Self { inner, lo, hi }
    }
}

impl ProgressSink for ScaledSink<'_> {
    fn report(&self, percent: u8, message: &str) {
        let span = (self.hi - self.lo) as u32;
        let scaled = self.lo as u32 + (percent.min(100) as u32 * span) / 100;
        self.inner.report(scaled as u8, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        seen: Mutex<Vec<u8>>,
    }

    impl ProgressSink for Recording {
        fn report(&self, percent: u8, _message: &str) {
            self.seen.lock().push(percent);
        }
    }

    #[test]
    fn scaled_sink_maps_endpoints_into_the_band() {
        let recording = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let scaled = ScaledSink::new(&recording, 20, 90);
        scaled.report(0, "start");
        scaled.report(50, "halfway");
        scaled.report(100, "done");
        assert_eq!(*recording.seen.lock(), vec![20, 55, 90]);
    }

    #[test]
    fn scaled_sink_clamps_overflow() {
        let recording = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let scaled = ScaledSink::new(&recording, 20, 90);
        scaled.report(200, "too much");
        assert_eq!(*recording.seen.lock(), vec![90]);
    }

    #[test]
    fn monotone_input_stays_monotone_after_scaling() {
        let recording = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let scaled = ScaledSink::new(&recording, 20, 90);
        for percent in [0u8, 10, 10, 35, 60, 95, 100] {
            scaled.report(percent, "step");
        }
        let seen = recording.seen.lock();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
