use std::sync::Mutex;

use crossbeam_channel as channel;
use tracing::warn;

/// One permit to dispatch a transfer task.
#[derive(Debug)]
pub struct WorkUnit;

/// Bounded queue of work units. The dispatcher only spawns a task when it
/// can take a unit out, so queued plus running units never exceed the
/// capacity.
pub struct AdmissionGate {
    tx: channel::Sender<WorkUnit>,
    rx: channel::Receiver<WorkUnit>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Queue a unit. Returns false if the gate is full, which means more
    /// units were produced than the concurrency ceiling allows.
    pub fn admit(&self) -> bool {
        match self.tx.try_send(WorkUnit) {
            Ok(()) => true,
            Err(e) => {
                warn!(?e, "Admission gate rejected work unit");
                false
            }
        }
    }

    pub fn receiver(&self) -> &channel::Receiver<WorkUnit> {
        &self.rx
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

/// Decides when a successful completion earns an extra concurrent task.
///
/// Each success below the ceiling adds exactly one task, so concurrency
/// roughly doubles per round of completions until it nears the ceiling.
pub struct GrowthPolicy {
    live: Mutex<usize>,
    max: usize,
}

impl GrowthPolicy {
    pub fn new(initial: usize, max: usize) -> Self {
        Self { live: Mutex::new(initial), max }
    }

    /// Bump the live task count if there is room. Returns the new count
    /// when it grew.
    pub fn try_grow(&self) -> Option<usize> {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if *live < self.max {
            *live += 1;
            Some(*live)
        } else {
            None
        }
    }

    /// Give up a failed task's slot. Returns the remaining live count.
    pub fn retire(&self) -> usize {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        *live = live.saturating_sub(1);
        *live
    }

    pub fn live(&self) -> usize {
        *self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}
