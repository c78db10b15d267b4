//! End-to-end batch run: schedule, aggregate, persist, alert.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::alert::{AlertEngine, AlertOutcome};
use crate::domain::{AggregateReport, JobDescriptor, JobResult, RunOutcome};
use crate::metrics::METRICS;
use crate::obs;
use crate::report_store::ReportWriter;
use crate::scheduler::{ScheduleSummary, Scheduler};

/// Every job verified.
pub const EXIT_ALL_PASSED: i32 = 0;
/// Some jobs verified.
pub const EXIT_PARTIAL: i32 = 1;
/// No job verified.
pub const EXIT_ALL_FAILED: i32 = 2;
/// Configuration or setup problem; nothing ran.
pub const EXIT_SETUP_ERROR: i32 = 3;
/// Interrupted by the user.
pub const EXIT_INTERRUPTED: i32 = 4;

/// Result of a complete batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: String,
    pub report: AggregateReport,
    pub summary: ScheduleSummary,

    /// Snapshot key, when a writer is attached and the write succeeded.
    pub version: Option<String>,

    pub alerts: Vec<AlertOutcome>,
    pub duration_ms: u64,
}

impl BatchOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.summary.interrupted {
            return EXIT_INTERRUPTED;
        }
        match self.report.outcome() {
            RunOutcome::AllPassed => EXIT_ALL_PASSED,
            RunOutcome::PartialSuccess => EXIT_PARTIAL,
            RunOutcome::AllFailed => EXIT_ALL_FAILED,
        }
    }
}

/// Batch orchestrator.
pub struct BatchPipeline {
    scheduler: Scheduler,
    writer: Option<ReportWriter>,
    alerts: Option<AlertEngine>,
}

impl BatchPipeline {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            writer: None,
            alerts: None,
        }
    }

    pub fn with_writer(mut self, writer: ReportWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_alerts(mut self, alerts: AlertEngine) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Run `jobs` to completion.
    ///
    /// An interrupt still aggregates, persists and alerts on whatever
    /// results exist. Persistence and alerting problems are logged, never
    /// fatal.
    pub async fn run(&self, jobs: Vec<JobDescriptor>, shutdown: CancellationToken) -> BatchOutcome {
        self.run_with(jobs, shutdown, |_| {}).await
    }

    /// Like [`BatchPipeline::run`], calling `on_result` as each job finishes.
    pub async fn run_with<F>(
        &self,
        jobs: Vec<JobDescriptor>,
        shutdown: CancellationToken,
        mut on_result: F,
    ) -> BatchOutcome
    where
        F: FnMut(&JobResult),
    {
        let start = Instant::now();
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let span = obs::run_span(&run_id);
        let config = self.scheduler.config();
        obs::emit_run_started(&run_id, jobs.len(), config.max_parallel, config.fail_fast);

        let (report, summary, version, alerts) = async {
            let mut handle = self.scheduler.run(jobs, shutdown);
            let mut results = Vec::new();
            while let Some(result) = handle.results.recv().await {
                on_result(&result);
                results.push(result);
            }
            let summary = match handle.join.await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "dispatcher task failed");
                    ScheduleSummary::default()
                }
            };

            let report = aggregate(results);
            obs::emit_run_finished(&run_id, &report, summary.interrupted);

            let version = match &self.writer {
                Some(writer) => match writer.persist(&report).await {
                    Ok(version) => Some(version),
                    Err(e) => {
                        warn!(error = %e, "failed to persist report");
                        None
                    }
                },
                None => None,
            };

            let alerts = match &self.alerts {
                Some(engine) => match engine.evaluate(&report).await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        warn!(error = %e, "alert evaluation failed");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            (report, summary, version, alerts)
        }
        .instrument(span)
        .await;

        METRICS.flush();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(run_id = %run_id, duration_ms, "batch run complete");

        BatchOutcome {
            run_id,
            report,
            summary,
            version,
            alerts,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobKind, JobStatus};
    use crate::fakes::{JobScript, ScriptedExecutor};
    use crate::scheduler::SchedulerConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn jobs(n: usize) -> Vec<JobDescriptor> {
        (0..n)
            .map(|i| JobDescriptor::new(format!("job-{i}"), JobKind::SyntaxCheck, "j", "j.tla"))
            .collect()
    }

    fn pipeline(executor: ScriptedExecutor) -> BatchPipeline {
        let scheduler = Scheduler::new(Arc::new(executor), SchedulerConfig::new(2)).unwrap();
        BatchPipeline::new(scheduler)
    }

    #[tokio::test]
    async fn test_exit_codes_follow_outcome() {
        let ok = JobScript::new(JobStatus::Success, Duration::from_millis(5));
        let outcome = pipeline(ScriptedExecutor::new(ok.clone()))
            .run(jobs(3), CancellationToken::new())
            .await;
        assert_eq!(outcome.exit_code(), EXIT_ALL_PASSED);

        let mixed = ScriptedExecutor::new(ok)
            .with_script("job-1", JobScript::new(JobStatus::Failed, Duration::from_millis(5)));
        let outcome = pipeline(mixed).run(jobs(3), CancellationToken::new()).await;
        assert_eq!(outcome.exit_code(), EXIT_PARTIAL);

        let bad = JobScript::new(JobStatus::Missing, Duration::ZERO);
        let outcome = pipeline(ScriptedExecutor::new(bad))
            .run(jobs(2), CancellationToken::new())
            .await;
        assert_eq!(outcome.exit_code(), EXIT_ALL_FAILED);
    }

    #[tokio::test]
    async fn test_on_result_sees_every_job() {
        let ok = JobScript::new(JobStatus::Success, Duration::from_millis(1));
        let mut seen = Vec::new();
        let outcome = pipeline(ScriptedExecutor::new(ok))
            .run_with(jobs(4), CancellationToken::new(), |r| seen.push(r.job_id.clone()))
            .await;
        assert_eq!(seen.len(), 4);
        assert_eq!(outcome.report.total_jobs, 4);
        assert!(outcome.version.is_none());
    }
}
