//! Result aggregation.
//!
//! [`aggregate`] is a pure reduction: the same set of results, in any order,
//! always produces an identical report.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::domain::{AggregateReport, JobResult, JobStatus};

/// Integer success percentage; 0 when there are no jobs.
pub fn success_rate(success_count: u64, total_jobs: u64) -> u64 {
    if total_jobs == 0 {
        0
    } else {
        success_count * 100 / total_jobs
    }
}

/// Total order used to canonicalize the result set.
///
/// Sorts by job id first; among duplicates of one job the later
/// `finished_at` sorts last and wins. Every other field takes part so that
/// two results only tie when they are identical.
fn canonical_order(a: &JobResult, b: &JobResult) -> Ordering {
    a.job_id
        .cmp(&b.job_id)
        .then_with(|| a.finished_at.cmp(&b.finished_at))
        .then_with(|| a.started_at.cmp(&b.started_at))
        .then_with(|| a.status.cmp(&b.status))
        .then_with(|| a.obligations_total.cmp(&b.obligations_total))
        .then_with(|| a.obligations_proved.cmp(&b.obligations_proved))
        .then_with(|| a.duration_seconds.total_cmp(&b.duration_seconds))
        .then_with(|| a.cancelled.cmp(&b.cancelled))
        .then_with(|| a.log_ref.cmp(&b.log_ref))
        .then_with(|| a.exit_code.cmp(&b.exit_code))
        .then_with(|| a.counters.cmp(&b.counters))
        .then_with(|| a.authoritative.cmp(&b.authoritative))
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.name.cmp(&b.name))
}

/// Reduce a set of job results into an [`AggregateReport`].
///
/// Obligations are summed over every result regardless of status, so a
/// failed job still contributes its total to the denominator.
pub fn aggregate<I>(results: I) -> AggregateReport
where
    I: IntoIterator<Item = JobResult>,
{
    let mut per_job: Vec<JobResult> = results.into_iter().collect();
    per_job.sort_by(canonical_order);

    // Set semantics: one entry per job id, keeping the last in canonical order.
    per_job.reverse();
    per_job.dedup_by(|later, earlier| later.job_id == earlier.job_id);
    per_job.reverse();

    let mut report = AggregateReport {
        timestamp: DateTime::<Utc>::UNIX_EPOCH,
        total_jobs: per_job.len() as u64,
        success_count: 0,
        failed_count: 0,
        timeout_count: 0,
        missing_count: 0,
        partial_count: 0,
        success_rate: 0,
        obligations_total: 0,
        obligations_verified: 0,
        per_job: Vec::new(),
    };

    for result in &per_job {
        match result.status {
            JobStatus::Success => report.success_count += 1,
            JobStatus::Failed => report.failed_count += 1,
            JobStatus::Timeout => report.timeout_count += 1,
            JobStatus::Missing => report.missing_count += 1,
            JobStatus::Partial => report.partial_count += 1,
        }
        report.obligations_total += result.obligations_total;
        report.obligations_verified += result.obligations_proved;
        if result.finished_at > report.timestamp {
            report.timestamp = result.finished_at;
        }
    }

    report.success_rate = success_rate(report.success_count, report.total_jobs);
    report.per_job = per_job;
    report
}
