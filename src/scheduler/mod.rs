//! Tick scheduler
//!
//! One logical clock drives every periodic job. `run_due` is the
//! deterministic entry point (tests, the manual REPL); `spawn` hands each job
//! its own tokio task for real-time operation. Different jobs may run
//! concurrently; a single job never overlaps itself.

pub mod job;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::clock::Clock;
use crate::core::types::Timestamp;

pub use job::PeriodicJob;

pub struct TickScheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<Arc<PeriodicJob>>,
}

/// Running tokio drivers; dropping it without `stop` leaves them running
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every driver and wait for in-flight runs to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}

impl TickScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
        }
    }

    /// Register a job; its first period starts now
    pub fn add(
        &mut self,
        name: impl Into<String>,
        period_ms: u64,
        task: impl Fn(Timestamp) + Send + Sync + 'static,
    ) -> Arc<PeriodicJob> {
        let job = Arc::new(PeriodicJob::new(name, period_ms, self.clock.now(), task));
        tracing::debug!("Registered job {} every {}ms", job.name(), job.period_ms());
        self.jobs.push(job.clone());
        job
    }

    pub fn jobs(&self) -> &[Arc<PeriodicJob>] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&Arc<PeriodicJob>> {
        self.jobs.iter().find(|j| j.name() == name)
    }

    /// Run every job whose period has elapsed, in registration order.
    /// Returns the names of the jobs that ran.
    pub fn run_due(&self) -> Vec<String> {
        let now = self.clock.now();
        self.jobs
            .iter()
            .filter(|job| job.is_due(now) && job.try_run(now))
            .map(|job| job.name().to_string())
            .collect()
    }

    /// Run every job immediately regardless of its period
    pub fn run_all(&self) {
        let now = self.clock.now();
        for job in &self.jobs {
            job.try_run(now);
        }
    }

    /// Drive each job from its own tokio task until the handle is stopped.
    ///
    /// Must be called from within a tokio runtime. Job bodies run on the
    /// blocking pool since they take std locks.
    pub fn spawn(&self) -> SchedulerHandle {
        let (shutdown, _) = watch::channel(false);
        let tasks = self
            .jobs
            .iter()
            .map(|job| {
                let job = job.clone();
                let clock = self.clock.clone();
                let mut stop = shutdown.subscribe();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_millis(job.period_ms()));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // The first tick completes immediately
                    interval.tick().await;
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                let job = job.clone();
                                let now = clock.now();
                                if let Err(e) = tokio::task::spawn_blocking(move || job.try_run(now)).await {
                                    tracing::warn!("Job run failed: {}", e);
                                }
                            }
                            changed = stop.changed() => {
                                if changed.is_err() || *stop.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!("Job {} stopped", job.name());
                })
            })
            .collect();

        tracing::info!("Scheduler started with {} jobs", self.jobs.len());
        SchedulerHandle { shutdown, tasks }
    }
}
