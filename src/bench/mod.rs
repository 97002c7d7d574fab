//! Adaptive concurrent benchmark runner.
//!
//! Transfers run on scoped threads admitted through a bounded work queue.
//! Every chunk they move lands in a fixed-resolution sample series, which
//! is reduced to a single rate once the deadline passes and all tasks have
//! unwound.

mod error;
mod gate;
mod runner;
mod series;

pub use error::{ConfigError, RunError};
#[cfg(test)]
pub use runner::run_benchmark;
pub use runner::{
    run_benchmark_until, BenchmarkConfig, BenchmarkReport, FailurePolicy, DEFAULT_RESOLUTION,
};
pub use series::{ChunkSink, TimeExpired};
#[cfg(test)]
pub use series::{ActiveFlag, SampleSeries};
