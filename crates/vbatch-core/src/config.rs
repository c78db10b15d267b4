//! Batch configuration file.
//!
//! A JSON document naming jobs explicitly or through glob discovery rules,
//! plus the knobs the scheduler and executor need. The CLI layers flags and
//! environment variables on top (flags > env > file > defaults).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{JobDescriptor, JobKind};
use crate::error::{Result, VbatchError};
use crate::executor::{AdapterRegistry, ExecutorConfig, ToolCommand, DEFAULT_KILL_GRACE};
use crate::scheduler::{SchedulerConfig, TimeoutPolicy, DEFAULT_TIMEOUT_CEILING};

pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_OUTPUT_DIR: &str = "verification-results";

/// Glob rule producing one descriptor per matching file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRule {
    pub kind: JobKind,

    /// Glob relative to the config file's directory.
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Contents of `vbatch.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub output_dir: PathBuf,
    pub max_parallel: usize,
    pub timeout_ceiling_secs: u64,
    pub kill_grace_secs: u64,
    pub fail_fast: bool,

    /// Per-kind default timeouts overriding the adapters' built-ins.
    pub kind_timeouts: HashMap<JobKind, u64>,

    /// Per-kind tool invocations overriding the built-ins.
    pub tools: HashMap<JobKind, ToolCommand>,

    pub jobs: Vec<JobDescriptor>,
    pub discover: Vec<DiscoveryRule>,

    /// Directory relative paths resolve against; set by [`BatchConfig::load`].
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_parallel: DEFAULT_MAX_PARALLEL,
            timeout_ceiling_secs: DEFAULT_TIMEOUT_CEILING.as_secs(),
            kill_grace_secs: DEFAULT_KILL_GRACE.as_secs(),
            fail_fast: false,
            kind_timeouts: HashMap::new(),
            tools: HashMap::new(),
            jobs: Vec::new(),
            discover: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl BatchConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VbatchError::ConfigNotFound(path.display().to_string()),
            _ => VbatchError::Io(e),
        })?;
        let mut config = Self::from_json(&raw)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| VbatchError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(VbatchError::Config("max_parallel must be at least 1".into()));
        }
        if self.timeout_ceiling_secs == 0 {
            return Err(VbatchError::Config("timeout_ceiling_secs must be positive".into()));
        }
        for (kind, command) in &self.tools {
            if command.program.trim().is_empty() {
                return Err(VbatchError::EmptyCommand {
                    kind: kind.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a possibly relative path against the config directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve_path(&self.output_dir).join("state")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve_path(&self.output_dir).join("logs")
    }

    /// Timeout policy: config kind timeouts over adapter built-ins.
    pub fn timeout_policy(&self, registry: &AdapterRegistry) -> TimeoutPolicy {
        let mut defaults = registry.default_timeouts();
        for (kind, secs) in &self.kind_timeouts {
            defaults.insert(*kind, Duration::from_secs(*secs));
        }
        TimeoutPolicy::new(Duration::from_secs(self.timeout_ceiling_secs), defaults)
    }

    pub fn scheduler_config(&self, registry: &AdapterRegistry) -> SchedulerConfig {
        SchedulerConfig::new(self.max_parallel)
            .with_fail_fast(self.fail_fast)
            .with_timeouts(self.timeout_policy(registry))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::default()
            .with_log_dir(self.log_dir())
            .with_kill_grace(Duration::from_secs(self.kill_grace_secs));
        for (kind, command) in &self.tools {
            let mut command = command.clone();
            command.cwd = command.cwd.map(|cwd| self.resolve_path(&cwd));
            config = config.with_command(*kind, command);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = BatchConfig::from_json("{}").unwrap();
        assert_eq!(config.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.timeout_ceiling_secs, 3600);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let err = BatchConfig::from_json(r#"{"max_parallel": 0}"#).unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_malformed_is_config_error() {
        let err = BatchConfig::from_json(r#"{"max_parallel": "lots"}"#).unwrap_err();
        assert!(matches!(err, VbatchError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = BatchConfig::load(Path::new("/nonexistent/vbatch.json")).unwrap_err();
        assert!(matches!(err, VbatchError::ConfigNotFound(_)));
    }

    #[test]
    fn test_full_document() {
        let raw = r#"{
            "output_dir": "out",
            "max_parallel": 2,
            "timeout_ceiling_secs": 900,
            "kind_timeouts": {"proof_check": 1200, "syntax_check": 30},
            "tools": {"native_test": {"program": "sh", "args": ["{target}"]}},
            "jobs": [
                {"id": "proof:Paxos", "kind": "proof_check", "name": "Paxos", "target_path": "proofs/Paxos.tla", "timeout_override": 60}
            ],
            "discover": [{"kind": "model_check", "pattern": "models/*.cfg"}]
        }"#;
        let config = BatchConfig::from_json(raw).unwrap();
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].timeout_override, Some(60));
        assert_eq!(config.discover[0].kind, JobKind::ModelCheck);

        let policy = config.timeout_policy(&AdapterRegistry::builtin());
        let proof = JobDescriptor::new("p", JobKind::ProofCheck, "p", "p.tla");
        let syntax = JobDescriptor::new("s", JobKind::SyntaxCheck, "s", "s.tla");
        assert_eq!(policy.resolve(&proof), Duration::from_secs(900));
        assert_eq!(policy.resolve(&syntax), Duration::from_secs(30));

        let exec = config.executor_config();
        assert_eq!(exec.log_dir, Some(PathBuf::from("out/logs")));
        assert_eq!(exec.commands[&JobKind::NativeTest].program, "sh");
    }

    #[test]
    fn test_load_sets_base_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vbatch.json");
        std::fs::write(&path, "{}").unwrap();
        let config = BatchConfig::load(&path).unwrap();
        assert_eq!(config.base_dir, tmp.path());
        assert_eq!(config.resolve_path(Path::new("a.tla")), tmp.path().join("a.tla"));
    }

    #[test]
    fn test_output_dir_relative_to_config_file() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let path = sub.join("vbatch.json");
        std::fs::write(&path, r#"{"output_dir": "out"}"#).unwrap();

        let config = BatchConfig::load(&path).unwrap();
        assert_eq!(config.state_dir(), sub.join("out").join("state"));
        assert_eq!(config.log_dir(), sub.join("out").join("logs"));
        assert_eq!(config.executor_config().log_dir, Some(sub.join("out").join("logs")));

        let mut absolute = config.clone();
        absolute.output_dir = tmp.path().join("abs");
        assert_eq!(absolute.state_dir(), tmp.path().join("abs").join("state"));
    }
}
