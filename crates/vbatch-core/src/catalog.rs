//! The job catalog: explicit descriptors plus glob discovery.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{BatchConfig, DiscoveryRule};
use crate::domain::{JobDescriptor, JobKind};
use crate::error::{Result, VbatchError};

/// Ordered list of descriptors with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCatalog {
    jobs: Vec<JobDescriptor>,
}

impl JobCatalog {
    /// Rejects duplicate ids.
    pub fn new(jobs: Vec<JobDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for job in &jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(VbatchError::DuplicateJobId(job.id.clone()));
            }
        }
        Ok(Self { jobs })
    }

    /// Explicit jobs first, then discovered ones in rule order.
    ///
    /// Relative target paths are resolved against the config directory.
    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        let mut jobs: Vec<JobDescriptor> = config
            .jobs
            .iter()
            .cloned()
            .map(|mut job| {
                job.target_path = config.resolve_path(&job.target_path);
                job
            })
            .collect();
        for rule in &config.discover {
            jobs.extend(discover(rule, &config.base_dir)?);
        }
        Self::new(jobs)
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobDescriptor> {
        self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn count_by_kind(&self, kind: JobKind) -> usize {
        self.jobs.iter().filter(|j| j.kind == kind).count()
    }

    /// Keep jobs whose id or name matches one of `filters`.
    /// An empty filter list keeps everything.
    pub fn select(self, filters: &[String]) -> Self {
        if filters.is_empty() {
            return self;
        }
        let jobs = self
            .jobs
            .into_iter()
            .filter(|job| filters.iter().any(|f| f == &job.id || f == &job.name))
            .collect();
        Self { jobs }
    }
}

/// Expand one rule into descriptors, sorted by path.
///
/// Ids are `<kind>:<path relative to base>`, names are file stems.
pub fn discover(rule: &DiscoveryRule, base_dir: &Path) -> Result<Vec<JobDescriptor>> {
    let pattern = base_dir.join(&rule.pattern);
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| VbatchError::Discovery {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => warn!(pattern = %rule.pattern, error = %e, "skipping unreadable path"),
        }
    }
    paths.sort();
    debug!(pattern = %rule.pattern, matches = paths.len(), "discovery rule expanded");

    Ok(paths
        .into_iter()
        .map(|path| {
            let relative = path.strip_prefix(base_dir).unwrap_or(&path);
            let id = format!("{}:{}", rule.kind, relative.to_string_lossy());
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone());
            let mut job = JobDescriptor::new(id, rule.kind, name, path.clone());
            job.timeout_override = rule.timeout_secs;
            job
        })
        .collect())
}
