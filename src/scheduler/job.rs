//! A named periodic job with a no-overlap guard

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::core::types::Timestamp;

pub type JobTask = Box<dyn Fn(Timestamp) + Send + Sync>;

pub struct PeriodicJob {
    name: String,
    period_ms: u64,
    last_run: Mutex<Timestamp>,
    running: AtomicBool,
    runs: AtomicU64,
    task: JobTask,
}

/// Clears the running flag even if the task panics
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PeriodicJob {
    /// `anchor` is the logical time the first period is measured from
    pub fn new(
        name: impl Into<String>,
        period_ms: u64,
        anchor: Timestamp,
        task: impl Fn(Timestamp) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            period_ms: period_ms.max(1),
            last_run: Mutex::new(anchor),
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            task: Box::new(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn last_run(&self) -> Timestamp {
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Completed invocations so far
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.last_run()) >= self.period_ms
    }

    /// Run the task unless an invocation is already in flight.
    ///
    /// Returns false when skipped. Missed periods are not replayed; one run
    /// covers however much time has passed.
    pub fn try_run(&self, now: Timestamp) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Job {} still running; skipping", self.name);
            return false;
        }
        let _guard = RunningGuard(&self.running);

        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = now;
        (self.task)(now);
        self.runs.fetch_add(1, Ordering::AcqRel);
        true
    }
}

impl std::fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("name", &self.name)
            .field("period_ms", &self.period_ms)
            .field("last_run", &self.last_run())
            .field("runs", &self.runs())
            .finish()
    }
}
