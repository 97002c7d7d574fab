use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Signal returned to a transfer once the run has stopped accepting work.
/// Producers stop on it; the runner never treats it as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("time expired")]
pub struct TimeExpired;

/// Fixed-resolution byte counts, one slot per `resolution` since run start.
pub struct SampleSeries {
    slots: Vec<AtomicU64>,
    resolution: Duration,
    late_bytes: AtomicU64,
}

impl SampleSeries {
    pub fn new(duration: Duration, resolution: Duration) -> Self {
        let len = usize::try_from(duration.as_nanos() / resolution.as_nanos().max(1)).unwrap_or(usize::MAX);
        Self {
            slots: (0..len).map(|_| AtomicU64::new(0)).collect(),
            resolution,
            late_bytes: AtomicU64::new(0),
        }
    }

    /// Attribute `bytes` to the slot covering `elapsed`. Anything past the
    /// last slot is kept out of the series and only counted as late.
    pub fn record_at(&self, elapsed: Duration, bytes: u64) {
        let idx = usize::try_from(elapsed.as_nanos() / self.resolution.as_nanos().max(1)).unwrap_or(usize::MAX);
        match self.slots.get(idx) {
            Some(slot) => slot.fetch_add(bytes, Ordering::Relaxed),
            None => self.late_bytes.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.load(Ordering::Relaxed)).collect()
    }

    pub fn total(&self) -> u64 {
        self.slots.iter().map(|s| s.load(Ordering::Relaxed)).sum()
    }

    pub fn late_bytes(&self) -> u64 {
        self.late_bytes.load(Ordering::Relaxed)
    }
}

/// Run-wide "still accepting work" flag. Starts set, cleared exactly once.
#[derive(Clone)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true only for the call that performed the transition.
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Per-chunk callback handed to transfers.
///
/// Cheap to clone and `'static`, so producers can move it into request
/// bodies that outlive the borrow of `run_once`.
#[derive(Clone)]
pub struct ChunkSink {
    series: Arc<SampleSeries>,
    active: ActiveFlag,
    start: Instant,
}

impl ChunkSink {
    pub fn new(series: Arc<SampleSeries>, active: ActiveFlag, start: Instant) -> Self {
        Self { series, active, start }
    }

    /// Record one chunk. The bytes always count, even on the call that
    /// reports expiry; the caller must stop transferring on `Err`.
    pub fn record(&self, bytes: usize) -> Result<(), TimeExpired> {
        self.series.record_at(self.start.elapsed(), bytes as u64);
        if self.active.is_active() {
            Ok(())
        } else {
            Err(TimeExpired)
        }
    }

    pub fn is_expired(&self) -> bool {
        !self.active.is_active()
    }
}
