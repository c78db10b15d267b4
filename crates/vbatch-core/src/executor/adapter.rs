//! Per-kind adapters: how a job kind is invoked and how its log is read.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{JobKind, JobStatus};
use crate::error::{Result, VbatchError};
use crate::process::CommandSpec;

/// Placeholder replaced by the job's target path.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Configurable tool invocation for one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Executable name or path.
    pub program: String,

    /// Arguments; `{target}` is substituted, otherwise the target is appended.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<std::path::PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
        }
    }

    /// Resolve against a concrete target.
    pub fn resolve(&self, kind: JobKind, target: &Path) -> Result<CommandSpec> {
        if self.program.trim().is_empty() {
            return Err(VbatchError::EmptyCommand {
                kind: kind.to_string(),
            });
        }
        let target = target.to_string_lossy();
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(TARGET_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(TARGET_PLACEHOLDER, &target)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(target.into_owned());
        }
        Ok(CommandSpec {
            program: self.program.clone(),
            args,
            cwd: self.cwd.clone(),
        })
    }
}

/// Counters recovered from a tool log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub obligations_total: u64,
    pub obligations_proved: u64,
    pub counters: BTreeMap<String, u64>,
}

impl LogSummary {
    pub fn new(total: u64, proved: u64) -> Self {
        Self {
            obligations_total: total,
            obligations_proved: proved.min(total),
            counters: BTreeMap::new(),
        }
    }

    pub fn with_counter(mut self, name: &str, value: u64) -> Self {
        self.counters.insert(name.to_string(), value);
        self
    }
}

/// Invocation and parsing strategy for one job kind.
///
/// Status classification is explicit per kind: `PARTIAL` only comes out of an
/// adapter that says so.
pub trait KindAdapter: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Built-in tool invocation, used when the configuration has none.
    fn default_command(&self) -> ToolCommand;

    /// Kind default timeout, before the run-wide ceiling applies.
    fn default_timeout(&self) -> Duration;

    /// Recover obligation counts and extra counters from the log text.
    fn parse(&self, log: &str) -> LogSummary;

    /// Classify a process that exited on its own.
    fn classify(&self, exit_code: Option<i32>, summary: &LogSummary, log: &str) -> JobStatus;
}

/// Closed set of adapters keyed by kind.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<JobKind, Arc<dyn KindAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry; see [`AdapterRegistry::builtin`] for the default set.
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the four built-in adapters.
    pub fn builtin() -> Self {
        use super::parsers::{ModelCheckAdapter, NativeTestAdapter, ProofCheckAdapter, SyntaxCheckAdapter};

        Self::empty()
            .with(Arc::new(SyntaxCheckAdapter))
            .with(Arc::new(ProofCheckAdapter))
            .with(Arc::new(ModelCheckAdapter))
            .with(Arc::new(NativeTestAdapter))
    }

    /// Register (or replace) the adapter for its kind.
    pub fn with(mut self, adapter: Arc<dyn KindAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn KindAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Default timeouts per registered kind.
    pub fn default_timeouts(&self) -> HashMap<JobKind, Duration> {
        self.adapters
            .iter()
            .map(|(kind, adapter)| (*kind, adapter.default_timeout()))
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_placeholder_substituted() {
        let cmd = ToolCommand::new("tlapm", &["--cleanfp", "{target}", "--threads", "4"]);
        let spec = cmd
            .resolve(JobKind::ProofCheck, &PathBuf::from("proofs/Paxos.tla"))
            .unwrap();
        assert_eq!(spec.args, vec!["--cleanfp", "proofs/Paxos.tla", "--threads", "4"]);
    }

    #[test]
    fn test_target_appended_without_placeholder() {
        let cmd = ToolCommand::new("sh", &[]);
        let spec = cmd
            .resolve(JobKind::NativeTest, &PathBuf::from("run.sh"))
            .unwrap();
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["run.sh"]);
    }

    #[test]
    fn test_empty_program_rejected() {
        let cmd = ToolCommand::new("  ", &[]);
        let err = cmd
            .resolve(JobKind::ModelCheck, &PathBuf::from("x.cfg"))
            .unwrap_err();
        assert!(matches!(err, VbatchError::EmptyCommand { .. }));
    }

    #[test]
    fn test_builtin_registry_covers_every_kind() {
        let registry = AdapterRegistry::builtin();
        for kind in JobKind::ALL {
            let adapter = registry.get(kind).expect("adapter registered");
            assert_eq!(adapter.kind(), kind);
        }
        assert_eq!(registry.default_timeouts().len(), 4);
    }

    #[test]
    fn test_log_summary_clamps() {
        let summary = LogSummary::new(3, 10);
        assert_eq!(summary.obligations_proved, 3);
    }
}
