//! vbatch-core: verification batch scheduling, aggregation and alerting
//!
//! Runs a heterogeneous batch of external verification jobs (syntax checks,
//! proofs, model checks, native test suites) under a concurrency bound and
//! per-kind timeouts, normalizes their outcomes into one status model, and
//! alerts on threshold breaches without repeating itself.
//!
//! ## Key Components
//!
//! - `JobCatalog`: explicit and glob-discovered job descriptors
//! - `ToolExecutor`: one job in, one `JobResult` out, via per-kind adapters
//! - `Scheduler`: bounded worker pool with fail-fast and interrupt
//! - `aggregate`: order-independent reduction into an `AggregateReport`
//! - `ReportWriter`: versioned report snapshots in a `StateStore`
//! - `AlertEngine`: threshold rules with persisted cooldowns
//! - `StatusPoller`: merged last-known-good view over several reports

pub mod aggregate;
pub mod alert;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod poller;
pub mod process;
pub mod report_store;
pub mod scheduler;
pub mod telemetry;

pub use aggregate::{aggregate, success_rate};
pub use alert::{
    AlertConfig, AlertEngine, AlertOutcome, AlertRule, CooldownState, NotificationChannel,
    Severity, ThresholdKind,
};
pub use catalog::JobCatalog;
pub use config::BatchConfig;
pub use domain::{AggregateReport, JobDescriptor, JobKind, JobResult, JobStatus, RunOutcome};
pub use error::{Result, VbatchError};
pub use executor::{ExecutorConfig, JobExecutor, KindAdapter, ToolCommand, ToolExecutor};
pub use pipeline::{BatchOutcome, BatchPipeline};
pub use poller::{MergedStatus, MetricValue, ReportLocation, StatusPoller};
pub use report_store::ReportWriter;
pub use scheduler::{ScheduleSummary, Scheduler, SchedulerConfig, SchedulerHandle, TimeoutPolicy};
pub use telemetry::init_tracing;
