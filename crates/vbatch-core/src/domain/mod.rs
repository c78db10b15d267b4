//! Domain model: descriptors, results and aggregate reports.

pub mod job;
pub mod report;

pub use job::{JobDescriptor, JobKind, JobResult, JobStatus};
pub use report::{AggregateReport, RunOutcome};
