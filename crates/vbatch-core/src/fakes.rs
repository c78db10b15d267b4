//! In-memory fakes for tests: a scriptable executor and notification
//! channels that record or fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::alert::{NotificationChannel, Severity};
use crate::domain::{JobDescriptor, JobResult, JobStatus};
use crate::error::{Result, VbatchError};
use crate::executor::JobExecutor;

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Behaviour of one scripted job.
#[derive(Debug, Clone)]
pub struct JobScript {
    pub status: JobStatus,
    pub delay: Duration,
    pub obligations: (u64, u64),
    pub panic: bool,
}

impl JobScript {
    pub fn new(status: JobStatus, delay: Duration) -> Self {
        Self {
            status,
            delay,
            obligations: (1, u64::from(status == JobStatus::Success)),
            panic: false,
        }
    }

    pub fn with_obligations(mut self, total: u64, proved: u64) -> Self {
        self.obligations = (total, proved);
        self
    }

    pub fn panicking(delay: Duration) -> Self {
        Self {
            panic: true,
            ..Self::new(JobStatus::Success, delay)
        }
    }
}

/// Executor that sleeps and returns a scripted status.
///
/// Tracks in-flight concurrency and start order. Honours cancellation the
/// way a real executor does: a cancelled job ends as a cancelled TIMEOUT.
pub struct ScriptedExecutor {
    default: JobScript,
    scripts: HashMap<String, JobScript>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(default: JobScript) -> Self {
        Self {
            default,
            scripts: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(mut self, job_id: &str, script: JobScript) -> Self {
        self.scripts.insert(job_id.to_string(), script);
        self
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Job ids in the order `execute` was entered.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        _timeout: Duration,
        cancel: CancellationToken,
    ) -> JobResult {
        let started_at = Utc::now();
        self.started.lock().unwrap().push(descriptor.id.clone());
        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let script = self.scripts.get(&descriptor.id).unwrap_or(&self.default);
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(script.delay) => false,
            _ = cancel.cancelled() => true,
        };
        if cancelled {
            let mut result = JobResult::new(descriptor, JobStatus::Timeout, 0, 0, started_at, Utc::now());
            result.cancelled = true;
            result.authoritative = false;
            return result;
        }
        if script.panic {
            panic!("scripted panic in {}", descriptor.id);
        }
        let (total, proved) = script.obligations;
        JobResult::new(descriptor, script.status, total, proved, started_at, Utc::now())
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// One captured notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub subject: String,
    pub body: String,
    pub severity: Severity,
}

/// Channel that records every message.
pub struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, subject: &str, body: &str, severity: Severity) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            subject: subject.to_string(),
            body: body.to_string(),
            severity,
        });
        Ok(())
    }
}

/// Channel that always fails and counts attempts.
#[derive(Default)]
pub struct FailingChannel {
    attempts: AtomicUsize,
}

impl FailingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _subject: &str, _body: &str, _severity: Severity) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(VbatchError::Notification {
            channel: "failing".to_string(),
            reason: "relay unavailable".to_string(),
        })
    }
}
