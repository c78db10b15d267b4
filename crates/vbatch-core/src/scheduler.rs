//! Bounded-concurrency job scheduler.
//!
//! The dispatcher keeps at most `max_parallel` jobs in a [`JoinSet`] and
//! starts the next pending descriptor, in submission order, whenever one
//! finishes. Cancellation flows through a token hierarchy: the caller's
//! shutdown token, a per-run child (tripped by fail-fast), and a per-job child
//! handed to the executor.
//!
//! Every submitted descriptor yields exactly one [`JobResult`] on the results
//! channel, whether it ran, panicked, was cancelled mid-flight or never
//! started.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::domain::{JobDescriptor, JobKind, JobResult, JobStatus};
use crate::error::{Result, VbatchError};
use crate::executor::JobExecutor;
use crate::metrics::METRICS;
use crate::obs;

/// Run-wide ceiling used when nothing else is configured.
pub const DEFAULT_TIMEOUT_CEILING: Duration = Duration::from_secs(3600);

/// Timeout resolution for descriptors.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub ceiling: Duration,
    pub kind_defaults: HashMap<JobKind, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_TIMEOUT_CEILING,
            kind_defaults: HashMap::new(),
        }
    }
}

impl TimeoutPolicy {
    pub fn new(ceiling: Duration, kind_defaults: HashMap<JobKind, Duration>) -> Self {
        Self {
            ceiling,
            kind_defaults,
        }
    }

    /// Per-job override, else `min(ceiling, kind default)`, else the ceiling.
    pub fn resolve(&self, descriptor: &JobDescriptor) -> Duration {
        if let Some(secs) = descriptor.timeout_override {
            return Duration::from_secs(secs);
        }
        match self.kind_defaults.get(&descriptor.kind) {
            Some(default) => (*default).min(self.ceiling),
            None => self.ceiling,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_parallel: usize,
    pub fail_fast: bool,
    pub timeouts: TimeoutPolicy,
}

impl SchedulerConfig {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel,
            fail_fast: false,
            timeouts: TimeoutPolicy::default(),
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// What happened to the run as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub submitted: usize,
    pub dispatched: usize,
    pub results_sent: usize,

    /// Highest number of jobs in flight at once.
    pub peak_in_flight: usize,

    /// Job id whose failure tripped fail-fast.
    pub fail_fast_trigger: Option<String>,

    /// The caller's shutdown token fired before the run completed.
    pub interrupted: bool,
}

/// Live handle on a scheduling run.
pub struct SchedulerHandle {
    pub results: mpsc::Receiver<JobResult>,
    pub join: JoinHandle<ScheduleSummary>,
}

impl SchedulerHandle {
    /// Drain every result and wait for the dispatcher.
    pub async fn collect(mut self) -> (Vec<JobResult>, ScheduleSummary) {
        let mut results = Vec::new();
        while let Some(result) = self.results.recv().await {
            results.push(result);
        }
        let summary = match self.join.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "dispatcher task failed");
                ScheduleSummary {
                    results_sent: results.len(),
                    ..ScheduleSummary::default()
                }
            }
        };
        (results, summary)
    }
}

/// Worker pool over a [`JobExecutor`].
pub struct Scheduler {
    executor: Arc<dyn JobExecutor>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Rejects `max_parallel == 0`.
    pub fn new(executor: Arc<dyn JobExecutor>, config: SchedulerConfig) -> Result<Self> {
        if config.max_parallel == 0 {
            return Err(VbatchError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(Self { executor, config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start dispatching `jobs`. Results stream out as jobs finish.
    pub fn run(&self, jobs: Vec<JobDescriptor>, shutdown: CancellationToken) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(jobs.len().max(1));
        let dispatcher = Dispatcher {
            executor: Arc::clone(&self.executor),
            config: self.config.clone(),
            run_token: shutdown.child_token(),
            shutdown,
            tx,
        };
        let join = tokio::spawn(dispatcher.drive(jobs));
        SchedulerHandle { results: rx, join }
    }

    /// Run to completion and return every result.
    pub async fn run_to_completion(
        &self,
        jobs: Vec<JobDescriptor>,
        shutdown: CancellationToken,
    ) -> (Vec<JobResult>, ScheduleSummary) {
        self.run(jobs, shutdown).collect().await
    }
}

type TaskOutput = (JobDescriptor, std::result::Result<JobResult, String>);

struct Dispatcher {
    executor: Arc<dyn JobExecutor>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    run_token: CancellationToken,
    tx: mpsc::Sender<JobResult>,
}

impl Dispatcher {
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    async fn drive(self, jobs: Vec<JobDescriptor>) -> ScheduleSummary {
        let mut summary = ScheduleSummary {
            submitted: jobs.len(),
            ..ScheduleSummary::default()
        };
        let mut pending: VecDeque<JobDescriptor> = jobs.into();
        let mut outstanding: HashMap<String, JobDescriptor> = HashMap::new();
        let mut in_flight: JoinSet<TaskOutput> = JoinSet::new();

        loop {
            while !self.run_token.is_cancelled() && in_flight.len() < self.config.max_parallel {
                let Some(descriptor) = pending.pop_front() else {
                    break;
                };
                outstanding.insert(descriptor.id.clone(), descriptor.clone());
                self.spawn_job(&mut in_flight, descriptor);
                summary.dispatched += 1;
                summary.peak_in_flight = summary.peak_in_flight.max(in_flight.len());
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (descriptor, outcome) = match joined {
                Ok(output) => output,
                Err(e) => {
                    // Tasks are never aborted; leftovers are settled after the loop.
                    error!(error = %e, "job task did not complete");
                    continue;
                }
            };
            outstanding.remove(&descriptor.id);

            let result = match outcome {
                Ok(result) => result,
                Err(panic) => {
                    error!(job_id = %descriptor.id, panic = %panic, "job panicked");
                    let now = Utc::now();
                    JobResult::new(&descriptor, JobStatus::Failed, 0, 0, now, now)
                }
            };

            if self.config.fail_fast
                && summary.fail_fast_trigger.is_none()
                && !result.cancelled
                && result.status.trips_fail_fast()
            {
                obs::emit_fail_fast(&result.job_id);
                summary.fail_fast_trigger = Some(result.job_id.clone());
                self.run_token.cancel();
            }

            self.send(result, &mut summary).await;
        }

        let now = Utc::now();
        for descriptor in outstanding.into_values() {
            let result = JobResult::new(&descriptor, JobStatus::Failed, 0, 0, now, now);
            self.send(result, &mut summary).await;
        }
        if !pending.is_empty() {
            info!(skipped = pending.len(), "run cancelled before dispatching every job");
        }
        for descriptor in pending {
            self.send(JobResult::not_started(&descriptor, now), &mut summary)
                .await;
        }

        summary.interrupted = self.shutdown.is_cancelled();
        summary
    }

    fn spawn_job(&self, in_flight: &mut JoinSet<TaskOutput>, descriptor: JobDescriptor) {
        let timeout = self.config.timeouts.resolve(&descriptor);
        let executor = Arc::clone(&self.executor);
        let job_token = self.run_token.child_token();

        METRICS.inc_jobs_dispatched();
        obs::emit_job_dispatched(&descriptor.id, descriptor.kind.name(), timeout.as_secs());

        in_flight.spawn(async move {
            let run = AssertUnwindSafe(executor.execute(&descriptor, timeout, job_token));
            let outcome = run.catch_unwind().await.map_err(panic_message);
            (descriptor, outcome)
        });
    }

    async fn send(&self, result: JobResult, summary: &mut ScheduleSummary) {
        obs::emit_job_finished(&result);
        if self.tx.send(result).await.is_ok() {
            summary.results_sent += 1;
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
