//! Job execution: one descriptor in, one terminal [`JobResult`] out.
//!
//! [`ToolExecutor`] turns a descriptor into a tool invocation through the
//! kind's [`KindAdapter`], runs it under a deadline and a cancellation token,
//! and classifies whatever came back. It never returns an error: every failure
//! mode is a [`JobStatus`].

pub mod adapter;
pub mod parsers;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{JobDescriptor, JobKind, JobResult, JobStatus};
use crate::metrics::METRICS;
use crate::process::{CommandSpec, ProcessLauncher, TokioProcessLauncher, WaitOutcome};

pub use adapter::{AdapterRegistry, KindAdapter, LogSummary, ToolCommand};
pub use parsers::{ModelCheckAdapter, NativeTestAdapter, ProofCheckAdapter, SyntaxCheckAdapter};

/// Default SIGTERM-to-SIGKILL grace period.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Runs a single job to a terminal result.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JobResult;
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory for per-job log files; `None` disables log files.
    pub log_dir: Option<PathBuf>,

    /// Grace between SIGTERM and SIGKILL on timeout or cancel.
    pub kill_grace: Duration,

    /// Tool invocations overriding the adapters' defaults.
    pub commands: HashMap<JobKind, ToolCommand>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            kill_grace: DEFAULT_KILL_GRACE,
            commands: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_command(mut self, kind: JobKind, command: ToolCommand) -> Self {
        self.commands.insert(kind, command);
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// Executor backed by external tools.
pub struct ToolExecutor {
    registry: AdapterRegistry,
    config: ExecutorConfig,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ToolExecutor {
    /// Built-in adapters over real OS processes.
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_parts(AdapterRegistry::builtin(), config, Arc::new(TokioProcessLauncher::default()))
    }

    pub fn with_parts(
        registry: AdapterRegistry,
        config: ExecutorConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            registry,
            config,
            launcher,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Command that would run for `descriptor`, for dry runs and logs.
    pub fn command_for(&self, descriptor: &JobDescriptor) -> crate::Result<CommandSpec> {
        let command = match self.config.commands.get(&descriptor.kind) {
            Some(command) => command.clone(),
            None => match self.registry.get(descriptor.kind) {
                Some(adapter) => adapter.default_command(),
                None => {
                    return Err(crate::VbatchError::Config(format!(
                        "no adapter registered for {}",
                        descriptor.kind
                    )))
                }
            },
        };
        command.resolve(descriptor.kind, &descriptor.target_path)
    }

    async fn write_log(&self, descriptor: &JobDescriptor, header: &LogHeader<'_>, output: &str) -> Option<String> {
        let dir = self.config.log_dir.as_ref()?;
        let path = dir.join(format!("{}.log", sanitize_job_id(&descriptor.id)));
        let contents = format!(
            "# job: {}\n# kind: {}\n# target: {}\n# command: {}\n# exit: {}\n# status: {}\n\n{}",
            descriptor.id,
            descriptor.kind,
            descriptor.target_path.display(),
            header.command,
            header
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            header.status,
            output,
        );

        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, contents).await
        }
        .await;
        match written {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(job_id = %descriptor.id, path = %path.display(), error = %e, "failed to write job log");
                None
            }
        }
    }

    async fn finish(
        &self,
        descriptor: &JobDescriptor,
        mut result: JobResult,
        command: &str,
        output: &str,
    ) -> JobResult {
        let header = LogHeader {
            command,
            exit_code: result.exit_code,
            status: result.status,
        };
        result.log_ref = self.write_log(descriptor, &header, output).await;
        result
    }
}

struct LogHeader<'a> {
    command: &'a str,
    exit_code: Option<i32>,
    status: JobStatus,
}

/// File-system safe form of a job id.
pub fn sanitize_job_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

async fn target_exists(path: &Path) -> bool {
    matches!(tokio::fs::try_exists(path).await, Ok(true))
}

#[async_trait]
impl JobExecutor for ToolExecutor {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JobResult {
        let started_at = Utc::now();

        if cancel.is_cancelled() {
            return JobResult::not_started(descriptor, started_at);
        }

        if !target_exists(&descriptor.target_path).await {
            let result = JobResult::new(descriptor, JobStatus::Missing, 0, 0, started_at, started_at);
            let output = format!("target not found: {}\n", descriptor.target_path.display());
            return self.finish(descriptor, result, "-", &output).await;
        }

        let spec = match self.command_for(descriptor) {
            Ok(spec) => spec,
            Err(e) => {
                let result = JobResult::new(descriptor, JobStatus::Failed, 0, 0, started_at, Utc::now());
                return self.finish(descriptor, result, "-", &format!("{e}\n")).await;
            }
        };
        let command_line = spec.display();
        // Adapter presence was checked by command_for unless an override exists.
        let adapter = self.registry.get(descriptor.kind);

        let deadline = deadline_after(timeout);
        let mut process = match self.launcher.start(&spec).await {
            Ok(process) => process,
            Err(e) => {
                warn!(job_id = %descriptor.id, command = %command_line, error = %e, "failed to start tool");
                let result = JobResult::new(descriptor, JobStatus::Failed, 0, 0, started_at, Utc::now());
                let output = format!("failed to start {}: {e}\n", spec.program);
                return self.finish(descriptor, result, &command_line, &output).await;
            }
        };
        debug!(job_id = %descriptor.id, pid = ?process.pid(), "job running");

        let outcome = process.wait_until(deadline, &cancel).await;
        let exit_code = match outcome {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::DeadlineExceeded | WaitOutcome::Cancelled => {
                if let Err(e) = process.force_kill(self.config.kill_grace).await {
                    warn!(job_id = %descriptor.id, error = %e, "failed to kill tool");
                }
                None
            }
        };
        let output = process.take_output().await;
        let finished_at = Utc::now();

        let summary = adapter
            .as_ref()
            .map(|a| a.parse(&output))
            .unwrap_or_default();
        let status = match outcome {
            WaitOutcome::Exited(_) => match &adapter {
                Some(adapter) => adapter.classify(exit_code, &summary, &output),
                None if exit_code == Some(0) => JobStatus::Success,
                None => JobStatus::Failed,
            },
            WaitOutcome::DeadlineExceeded | WaitOutcome::Cancelled => JobStatus::Timeout,
        };

        let mut result = JobResult::new(
            descriptor,
            status,
            summary.obligations_total,
            summary.obligations_proved,
            started_at,
            finished_at,
        );
        result.exit_code = exit_code;
        result.counters = summary.counters;
        match outcome {
            WaitOutcome::DeadlineExceeded => {
                METRICS.inc_jobs_timed_out();
                result.authoritative = false;
            }
            WaitOutcome::Cancelled => {
                result.authoritative = false;
                result.cancelled = true;
            }
            WaitOutcome::Exited(_) => {}
        }

        self.finish(descriptor, result, &command_line, &output).await
    }
}
