//! Scripted transfer for exercising the runner without a network.

use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::{Transfer, TransferError};
use crate::bench::ChunkSink;

pub struct ScriptedTransfer {
    chunk: usize,
    /// `None` keeps sending until told to stop.
    chunks_per_call: Option<usize>,
    delay: Duration,
    /// Call indexes that fail instead of transferring.
    failing: Option<Range<usize>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    reported: AtomicU64,
    last_started: Mutex<Option<Instant>>,
}

impl ScriptedTransfer {
    pub fn new(chunk: usize, chunks_per_call: Option<usize>, delay: Duration) -> Self {
        Self {
            chunk,
            chunks_per_call,
            delay,
            failing: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            reported: AtomicU64::new(0),
            last_started: Mutex::new(None),
        }
    }

    /// A transfer that ends immediately without moving any bytes.
    pub fn empty() -> Self {
        Self::new(0, Some(0), Duration::ZERO)
    }

    pub fn failing_calls(mut self, calls: Range<usize>) -> Self {
        self.failing = Some(calls);
        self
    }

    pub fn failing_from(self, call: usize) -> Self {
        self.failing_calls(call..usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// When the most recent `run_once` call began.
    pub fn last_started(&self) -> Option<Instant> {
        *self.last_started.lock().unwrap()
    }

    /// Bytes handed to the sink, including the chunk that saw expiry.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::SeqCst)
    }

    fn transfer(&self, sink: &ChunkSink) -> Result<(), TransferError> {
        let mut sent = 0usize;
        while self.chunks_per_call.map_or(true, |limit| sent < limit) {
            thread::sleep(self.delay);
            self.reported.fetch_add(self.chunk as u64, Ordering::SeqCst);
            sink.record(self.chunk)?;
            sent += 1;
        }
        Ok(())
    }
}

impl Transfer for ScriptedTransfer {
    fn run_once(&self, sink: &ChunkSink) -> Result<(), TransferError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut last = self.last_started.lock().unwrap();
            let now = Instant::now();
            *last = Some(last.map_or(now, |prev| prev.max(now)));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match &self.failing {
            Some(calls) if calls.contains(&call) => {
                thread::sleep(self.delay);
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into())
            }
            _ => self.transfer(sink),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
