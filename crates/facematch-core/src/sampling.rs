//! Per-source sampling cadence for recognition passes.
//!
//! Recognition runs on a sampled subset of frames, one pass at a time per
//! video source. A [`SamplingGate`] admits a pass only when the previous
//! one has finished and the interval has elapsed since it started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default interval between recognition passes (two per second).
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct SamplingGate {
    interval: Duration,
    last_started: Mutex<Option<Instant>>,
    in_flight: Arc<AtomicBool>,
}

impl SamplingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_started: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a pass at `now`, if one is due and none is running.
    ///
    /// The pass ends when the returned guard is dropped.
    pub fn try_begin(&self, now: Instant) -> Option<PassGuard> {
        let mut last = self.last_started.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.interval {
                return None;
            }
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("recognition pass still in flight; skipping frame");
            return None;
        }
        *last = Some(now);
        Some(PassGuard {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for SamplingGate {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

/// Marks a recognition pass as in flight until dropped.
#[derive(Debug)]
pub struct PassGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
