//! Structured lifecycle events for batch runs, jobs and alerts.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Instrument a run with [`run_span`] to tag everything inside with the run id.

use tracing::{info, warn};

use crate::domain::{AggregateReport, JobResult};

/// Run-scoped span; attach with `Instrument::instrument` so every event
/// inside carries the run id.
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span("3f6c1e2a")).await;
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("vbatch.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, total_jobs: usize, max_parallel: usize, fail_fast: bool) {
    info!(
        event = "run.started",
        run_id = %run_id,
        total_jobs,
        max_parallel,
        fail_fast,
    );
}

pub fn emit_job_dispatched(job_id: &str, kind: &str, timeout_secs: u64) {
    info!(event = "job.dispatched", job_id = %job_id, kind = %kind, timeout_secs);
}

pub fn emit_job_finished(result: &JobResult) {
    info!(
        event = "job.finished",
        job_id = %result.job_id,
        status = %result.status,
        obligations_total = result.obligations_total,
        obligations_proved = result.obligations_proved,
        duration_seconds = result.duration_seconds,
        cancelled = result.cancelled,
    );
}

pub fn emit_fail_fast(job_id: &str) {
    warn!(event = "run.fail_fast", trigger = %job_id, "cancelling remaining jobs");
}

pub fn emit_run_finished(run_id: &str, report: &AggregateReport, interrupted: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        total_jobs = report.total_jobs,
        success = report.success_count,
        failed = report.failed_count,
        timeout = report.timeout_count,
        missing = report.missing_count,
        partial = report.partial_count,
        success_rate = report.success_rate,
        interrupted,
    );
}

pub fn emit_report_persisted(version: &str) {
    info!(event = "report.persisted", version = %version);
}

pub fn emit_alert_dispatched(alert_type: &str, severity: &str, channels: usize) {
    info!(event = "alert.dispatched", alert_type = %alert_type, severity = %severity, channels);
}

pub fn emit_alert_suppressed(alert_type: &str, remaining_secs: i64) {
    info!(event = "alert.suppressed", alert_type = %alert_type, remaining_secs);
}

/// Delivery failures are warnings; they never fail the run.
pub fn emit_channel_error(channel: &str, error: &dyn std::fmt::Display) {
    warn!(event = "alert.channel_error", channel = %channel, error = %error);
}

pub fn emit_poll_error(source: &str, error: &dyn std::fmt::Display) {
    warn!(event = "poll.error", source = %source, error = %error);
}
