//! Job descriptors and terminal job results.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of verification job. Determines the tool invoked and how its log
/// is parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Specification parse / semantic check.
    SyntaxCheck,

    /// Theorem-prover run over proof obligations.
    ProofCheck,

    /// Explicit-state model-checking run.
    ModelCheck,

    /// Native implementation test suite.
    NativeTest,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::SyntaxCheck,
        JobKind::ProofCheck,
        JobKind::ModelCheck,
        JobKind::NativeTest,
    ];

    /// Stable snake_case name.
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::SyntaxCheck => "syntax_check",
            JobKind::ProofCheck => "proof_check",
            JobKind::ModelCheck => "model_check",
            JobKind::NativeTest => "native_test",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

/// One unit of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Unique within a scheduling run.
    pub id: String,

    pub kind: JobKind,

    /// Human-readable name.
    pub name: String,

    /// Artifact handed to the tool (spec, proof, model config, manifest).
    pub target_path: PathBuf,

    /// Per-job timeout in seconds; wins over kind defaults and the ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_override: Option<u64>,
}

impl JobDescriptor {
    pub fn new(
        id: impl Into<String>,
        kind: JobKind,
        name: impl Into<String>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            target_path: target_path.into(),
            timeout_override: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_override = Some(secs);
        self
    }
}

/// Uniform terminal status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Success,
    Failed,
    Timeout,
    Missing,
    Partial,
}

impl JobStatus {
    /// Whether this status trips fail-fast cancellation.
    pub fn trips_fail_fast(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Missing => "MISSING",
            JobStatus::Partial => "PARTIAL",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Terminal record for one dispatched descriptor. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub kind: JobKind,
    pub name: String,
    pub status: JobStatus,
    pub obligations_total: u64,
    pub obligations_proved: u64,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Path of the log artifact written for this job.
    pub log_ref: Option<String>,

    /// Process exit code, when the process exited on its own.
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Extra counters recovered from the log (states, modules, ...).
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,

    /// False when counters come from a log cut short by termination.
    #[serde(default = "default_true")]
    pub authoritative: bool,

    /// True when fail-fast or an interrupt stopped (or pre-empted) the job.
    #[serde(default)]
    pub cancelled: bool,
}

fn default_true() -> bool {
    true
}

impl JobResult {
    /// Build a result, clamping `proved` to `total`.
    pub fn new(
        descriptor: &JobDescriptor,
        status: JobStatus,
        obligations_total: u64,
        obligations_proved: u64,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let duration_seconds = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            job_id: descriptor.id.clone(),
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            status,
            obligations_total,
            obligations_proved: obligations_proved.min(obligations_total),
            duration_seconds,
            started_at,
            finished_at,
            log_ref: None,
            exit_code: None,
            counters: BTreeMap::new(),
            authoritative: true,
            cancelled: false,
        }
    }

    /// Terminal result for a descriptor that was never started because the
    /// run was cancelled before a slot reached it.
    pub fn not_started(descriptor: &JobDescriptor, at: DateTime<Utc>) -> Self {
        let mut result = Self::new(descriptor, JobStatus::Timeout, 0, 0, at, at);
        result.cancelled = true;
        result.authoritative = false;
        result
    }

    /// Fully verified means SUCCESS; everything else counts against alerts.
    pub fn is_verified(&self) -> bool {
        self.status == JobStatus::Success
    }
}
