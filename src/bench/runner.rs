use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, select};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::gate::{AdmissionGate, GrowthPolicy};
use super::series::{ActiveFlag, ChunkSink, SampleSeries};
use super::{ConfigError, RunError};
use crate::metrics::{format_rate, ThroughputAverager};
use crate::stats;
use crate::transfer::{Transfer, TransferError};

/// 10 samples per second.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(100);

/// Upper bound on sample slots in one run.
const MAX_SAMPLES: u128 = 1 << 24;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const PROGRESS_TAU_SECS: f64 = 2.0;

/// What a transfer error does to the rest of the run while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop dispatching, drain and report the error.
    #[default]
    Abort,
    /// Drop the failed task's slot and keep measuring with the others.
    Tolerate,
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub initial_concurrency: usize,
    pub max_concurrency: usize,
    pub duration: Duration,
    pub resolution: Duration,
    pub failure_policy: FailurePolicy,
}

impl BenchmarkConfig {
    pub fn new(initial_concurrency: usize, max_concurrency: usize, duration: Duration) -> Self {
        Self {
            initial_concurrency,
            max_concurrency,
            duration,
            resolution: DEFAULT_RESOLUTION,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_resolution(mut self, resolution: Duration) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_concurrency == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if self.max_concurrency < self.initial_concurrency {
            return Err(ConfigError::CeilingBelowInitial {
                initial: self.initial_concurrency,
                max: self.max_concurrency,
            });
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.resolution.is_zero() || self.resolution > self.duration {
            return Err(ConfigError::BadResolution {
                resolution: self.resolution,
                duration: self.duration,
            });
        }
        if self.duration.as_nanos() / self.resolution.as_nanos() > MAX_SAMPLES
            || Instant::now().checked_add(self.duration).is_none()
        {
            return Err(ConfigError::DurationTooLong { duration: self.duration });
        }
        Ok(())
    }

    /// Samples per second, never less than one.
    pub fn window(&self) -> usize {
        let res = self.resolution.as_nanos().max(1);
        let second = Duration::from_secs(1).as_nanos();
        ((second + res / 2) / res).max(1) as usize
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Estimated bytes per second. The window estimate is normalized to
    /// one second when the window does not span exactly one second.
    pub rate: u64,
    pub samples: Vec<u64>,
    pub total_bytes: u64,
    /// Bytes reported after the last sample slot closed.
    pub late_bytes: u64,
    /// Transfers that ended cleanly, at end of stream or at the deadline.
    pub completed_transfers: usize,
    pub failed_transfers: usize,
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeding,
    Active,
    Draining,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Seeding => "seeding",
            Phase::Active => "active",
            Phase::Draining => "draining",
            Phase::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Raised by a task to end the run before its deadline.
enum Halt {
    Fatal(TransferError),
    /// Every slot failed under [`FailurePolicy::Tolerate`] before any
    /// transfer completed.
    Exhausted { last: TransferError },
}

enum StopCause {
    Deadline,
    Halted(Halt),
    Interrupted,
}

struct RunContext<'a, T: ?Sized> {
    transfer: &'a T,
    series: Arc<SampleSeries>,
    sink: ChunkSink,
    active: ActiveFlag,
    gate: AdmissionGate,
    growth: GrowthPolicy,
    policy: FailurePolicy,
    halt_tx: channel::Sender<Halt>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl<T: Transfer + ?Sized> RunContext<'_, T> {
    fn dispatched(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn perform(&self) {
        let result = self.transfer.run_once(&self.sink);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(()) | Err(TransferError::TimeExpired(_)) => {
                self.completed.fetch_add(1, Ordering::AcqRel);
            }
            Err(err) if !self.active.is_active() => {
                debug!(?err, "Ignoring transfer error after deadline");
                return;
            }
            Err(err) => {
                self.fail(err);
                return;
            }
        }

        if !self.active.is_active() {
            return;
        }
        // Keep this slot busy, and earn one more slot if below the ceiling
        self.gate.admit();
        if let Some(live) = self.growth.try_grow() {
            debug!(live, "Growing concurrency");
            self.gate.admit();
        }
    }

    fn fail(&self, err: TransferError) {
        let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        match self.policy {
            FailurePolicy::Abort => {
                error!(?err, "Transfer failed, aborting benchmark");
                let _ = self.halt_tx.try_send(Halt::Fatal(err));
            }
            FailurePolicy::Tolerate => {
                let remaining = self.growth.retire();
                warn!(?err, failed, remaining, "Transfer failed, continuing without it");
                if remaining > 0 {
                    return;
                }
                if self.completed.load(Ordering::Acquire) == 0 {
                    let _ = self.halt_tx.try_send(Halt::Exhausted { last: err });
                } else {
                    warn!("Every transfer slot failed, measuring what was collected");
                }
            }
        }
    }

    fn bytes_so_far(&self) -> u64 {
        self.series.total() + self.series.late_bytes()
    }
}

struct ProgressMeter {
    avg: ThroughputAverager,
    last_bytes: u64,
    last: Instant,
}

impl ProgressMeter {
    fn new(start: Instant) -> Self {
        Self {
            avg: ThroughputAverager::new(PROGRESS_TAU_SECS),
            last_bytes: 0,
            last: start,
        }
    }

    fn log<T: Transfer + ?Sized>(&mut self, ctx: &RunContext<'_, T>) {
        let now = Instant::now();
        let bytes = ctx.bytes_so_far();
        let rate = self.avg.update(bytes - self.last_bytes, now.duration_since(self.last).as_secs_f64());
        self.last_bytes = bytes;
        self.last = now;
        debug!(
            rate = %format_rate(rate as u64),
            in_flight = ctx.in_flight.load(Ordering::Relaxed),
            live = ctx.growth.live(),
            queued = ctx.gate.queued(),
            "Progress"
        );
    }
}

/// Drive `transfer` with a growing pool of concurrent tasks for the
/// configured duration and estimate the achieved rate.
#[cfg(test)]
pub fn run_benchmark<T: Transfer + ?Sized>(
    transfer: &T,
    config: &BenchmarkConfig,
) -> Result<BenchmarkReport, RunError> {
    run_benchmark_until(transfer, config, &channel::never())
}

/// Like [`run_benchmark`], but a message on `interrupt` stops the run early
/// with [`RunError::Interrupted`].
pub fn run_benchmark_until<T: Transfer + ?Sized>(
    transfer: &T,
    config: &BenchmarkConfig,
    interrupt: &channel::Receiver<()>,
) -> Result<BenchmarkReport, RunError> {
    config.validate()?;
    debug!(
        phase = %Phase::Seeding,
        initial = config.initial_concurrency,
        max = config.max_concurrency,
        duration = ?config.duration,
        "Starting benchmark"
    );

    let series = Arc::new(SampleSeries::new(config.duration, config.resolution));
    let active = ActiveFlag::new();
    let (halt_tx, halt_rx) = channel::bounded::<Halt>(1);
    let start = Instant::now();
    let ctx = RunContext {
        transfer,
        series: Arc::clone(&series),
        sink: ChunkSink::new(Arc::clone(&series), active.clone(), start),
        active,
        gate: AdmissionGate::new(config.max_concurrency),
        growth: GrowthPolicy::new(config.initial_concurrency, config.max_concurrency),
        policy: config.failure_policy,
        halt_tx,
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    };
    for _ in 0..config.initial_concurrency {
        ctx.gate.admit();
    }

    let deadline_at = start
        .checked_add(config.duration)
        .ok_or(ConfigError::DurationTooLong { duration: config.duration })?;
    let deadline = channel::at(deadline_at);
    let progress = channel::tick(PROGRESS_INTERVAL);
    let never = channel::never::<()>();
    let mut interrupt_open = true;
    let mut meter = ProgressMeter::new(start);

    // The scope joins every dispatched task before returning
    let cause = thread::scope(|scope| {
        debug!(phase = %Phase::Active, "Dispatching transfers");
        let cause = loop {
            let interrupt_rx = if interrupt_open { interrupt } else { &never };
            select! {
                recv(ctx.gate.receiver()) -> unit => {
                    if unit.is_err() || Instant::now() >= deadline_at {
                        break StopCause::Deadline;
                    }
                    ctx.dispatched();
                    let ctx = &ctx;
                    scope.spawn(move || ctx.perform());
                }
                recv(deadline) -> _ => break StopCause::Deadline,
                recv(halt_rx) -> halt => match halt {
                    Ok(halt) => break StopCause::Halted(halt),
                    Err(_) => break StopCause::Deadline,
                },
                recv(interrupt_rx) -> msg => {
                    if msg.is_ok() {
                        break StopCause::Interrupted;
                    }
                    // Sender went away; nobody can interrupt us any more
                    interrupt_open = false;
                }
                recv(progress) -> _ => meter.log(&ctx),
            }
        };
        ctx.active.clear();
        debug!(
            phase = %Phase::Draining,
            in_flight = ctx.in_flight.load(Ordering::Relaxed),
            "Waiting for transfers to unwind"
        );
        cause
    });

    let elapsed = start.elapsed();
    let completed = ctx.completed.load(Ordering::Relaxed);
    let failed = ctx.failed.load(Ordering::Relaxed);
    debug!(phase = %Phase::Complete, ?elapsed, completed, failed, "Benchmark finished");

    match cause {
        StopCause::Deadline => {}
        StopCause::Interrupted => return Err(RunError::Interrupted),
        StopCause::Halted(Halt::Fatal(err)) => return Err(RunError::Transfer(err)),
        StopCause::Halted(Halt::Exhausted { last }) => {
            return Err(RunError::NoSuccessfulTransfers { failed, last })
        }
    }

    let samples = series.snapshot();
    let window = config.window().min(samples.len());
    let rate = per_second(stats::estimate(&samples, window), window, config.resolution);
    let report = BenchmarkReport {
        rate,
        total_bytes: samples.iter().sum(),
        samples,
        late_bytes: series.late_bytes(),
        completed_transfers: completed,
        failed_transfers: failed,
        peak_concurrency: ctx.peak.load(Ordering::Relaxed),
        elapsed,
    };
    info!(
        rate = %format_rate(report.rate),
        total_bytes = report.total_bytes,
        peak_concurrency = report.peak_concurrency,
        failed,
        "Benchmark complete"
    );
    Ok(report)
}

/// Scale a sum over `window` slots to bytes per second.
fn per_second(window_sum: u64, window: usize, resolution: Duration) -> u64 {
    let span = window as u128 * resolution.as_nanos();
    if span == 0 {
        return 0;
    }
    (window_sum as u128 * Duration::from_secs(1).as_nanos() / span) as u64
}
