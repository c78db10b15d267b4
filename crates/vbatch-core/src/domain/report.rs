//! Aggregate report model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobResult;

/// Reduced, order-independent summary of every job result in a run.
///
/// All counts are derived from `per_job`; see [`crate::aggregate::aggregate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateReport {
    /// Latest `finished_at` across `per_job` (Unix epoch when empty).
    pub timestamp: DateTime<Utc>,
    pub total_jobs: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub timeout_count: u64,
    pub missing_count: u64,
    pub partial_count: u64,
    /// `success_count * 100 / total_jobs`, integer percent; 0 for no jobs.
    pub success_rate: u64,
    pub obligations_total: u64,
    pub obligations_verified: u64,
    /// Sorted by `job_id`.
    pub per_job: Vec<JobResult>,
}

/// Coarse outcome of a run, mapped to the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AllPassed,
    PartialSuccess,
    AllFailed,
}

impl AggregateReport {
    /// Jobs that are not fully verified: failed, timed out, missing or partial.
    pub fn unverified_count(&self) -> u64 {
        self.failed_count + self.timeout_count + self.missing_count + self.partial_count
    }

    pub fn is_fully_verified(&self) -> bool {
        self.total_jobs > 0 && self.success_count == self.total_jobs
    }

    /// Longest single job duration, in seconds.
    pub fn max_duration_seconds(&self) -> f64 {
        self.per_job
            .iter()
            .map(|r| r.duration_seconds)
            .fold(0.0, f64::max)
    }

    /// Classify the run. An empty run counts as all-failed: nothing was verified.
    pub fn outcome(&self) -> RunOutcome {
        if self.is_fully_verified() {
            RunOutcome::AllPassed
        } else if self.success_count == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::PartialSuccess
        }
    }
}
