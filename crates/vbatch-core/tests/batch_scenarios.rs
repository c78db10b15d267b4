//! End-to-end scenarios over real subprocesses.
//!
//! Each kind's tool is overridden with `sh {target}` and targets are small
//! shell scripts that print what the real tool would print.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vbatch_core::fakes::RecordingChannel;
use vbatch_core::pipeline::{EXIT_ALL_FAILED, EXIT_ALL_PASSED, EXIT_PARTIAL};
use vbatch_core::{
    AlertConfig, AlertEngine, BatchPipeline, ExecutorConfig, JobCatalog, JobDescriptor, JobKind,
    JobStatus, ReportWriter, Scheduler, SchedulerConfig, ToolCommand, ToolExecutor,
};
use vbatch_state::FileStateStore;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn executor(&self) -> ToolExecutor {
        let mut config = ExecutorConfig::default()
            .with_log_dir(self.path().join("logs"))
            .with_kill_grace(Duration::from_millis(300));
        for kind in JobKind::ALL {
            config = config.with_command(kind, ToolCommand::new("sh", &["{target}"]));
        }
        ToolExecutor::new(config)
    }

    fn pipeline(&self, max_parallel: usize) -> BatchPipeline {
        let scheduler = Scheduler::new(Arc::new(self.executor()), SchedulerConfig::new(max_parallel))
            .expect("valid config");
        BatchPipeline::new(scheduler)
    }
}

const ALL_PROVED: &str = "echo '[INFO]: All 10 obligations proved.'\n";
const TESTS_PASS: &str = "echo 'test result: ok. 6 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out'\n";
const MODEL_OK: &str = "echo '128 states generated, 64 distinct states found, 0 states left on queue.'\n";

#[tokio::test]
async fn scenario_all_pass() {
    let ws = Workspace::new();
    let catalog = JobCatalog::new(vec![
        JobDescriptor::new("proof:Paxos", JobKind::ProofCheck, "Paxos", ws.script("paxos.sh", ALL_PROVED)),
        JobDescriptor::new("native:core", JobKind::NativeTest, "core", ws.script("tests.sh", TESTS_PASS)),
        JobDescriptor::new("model:Queue", JobKind::ModelCheck, "Queue", ws.script("model.sh", MODEL_OK)),
    ])
    .unwrap();

    let outcome = ws.pipeline(2).run(catalog.into_jobs(), CancellationToken::new()).await;
    let report = &outcome.report;

    assert_eq!(report.total_jobs, 3);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.timeout_count, 0);
    assert_eq!(report.success_rate, 100);
    assert_eq!(outcome.exit_code(), EXIT_ALL_PASSED);

    let model = report.per_job.iter().find(|r| r.job_id == "model:Queue").unwrap();
    assert_eq!(model.counters["distinct_states"], 64);
    for result in &report.per_job {
        let log = result.log_ref.as_ref().expect("log written before result");
        assert!(Path::new(log).exists());
    }
}

#[tokio::test]
async fn scenario_timeout_terminates_process() {
    let ws = Workspace::new();
    let pid_file = ws.path().join("tool.pid");
    let target = ws.script(
        "hang.sh",
        &format!(
            "echo 'test result: ok. 2 passed; 0 failed; 0 ignored'\necho $$ > {}\nexec sleep 10\n",
            pid_file.display()
        ),
    );
    let job = JobDescriptor::new("native:hang", JobKind::NativeTest, "hang", target).with_timeout(1);

    let begin = Instant::now();
    let outcome = ws.pipeline(1).run(vec![job], CancellationToken::new()).await;
    let elapsed = begin.elapsed();

    let result = &outcome.report.per_job[0];
    assert_eq!(result.status, JobStatus::Timeout);
    assert!(!result.authoritative);
    assert!(!result.cancelled);
    assert_eq!(result.obligations_proved, 2);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert!(result.duration_seconds >= 0.9 && result.duration_seconds < 5.0);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "tool process {pid} still running");
}

#[tokio::test]
async fn scenario_missing_target() {
    let ws = Workspace::new();
    let marker = ws.path().join("spawned");
    // The override would leave a marker if anything were spawned.
    let config = ExecutorConfig::default().with_command(
        JobKind::SyntaxCheck,
        ToolCommand::new("sh", &["-c", &format!("touch {}", marker.display()), "{target}"]),
    );
    let scheduler = Scheduler::new(Arc::new(ToolExecutor::new(config)), SchedulerConfig::new(1)).unwrap();
    let job = JobDescriptor::new("syntax:Ghost", JobKind::SyntaxCheck, "Ghost", ws.path().join("Ghost.tla"));

    let outcome = BatchPipeline::new(scheduler).run(vec![job], CancellationToken::new()).await;

    let result = &outcome.report.per_job[0];
    assert_eq!(result.status, JobStatus::Missing);
    assert_eq!(result.duration_seconds, 0.0);
    assert!(!marker.exists());
    assert_eq!(outcome.report.missing_count, 1);
    assert_eq!(outcome.exit_code(), EXIT_ALL_FAILED);
}

#[tokio::test]
async fn scenario_mixed_obligations() {
    let ws = Workspace::new();
    let jobs = vec![
        JobDescriptor::new("proof:A", JobKind::ProofCheck, "A", ws.script("a.sh", ALL_PROVED)),
        JobDescriptor::new(
            "proof:B",
            JobKind::ProofCheck,
            "B",
            ws.script("b.sh", "echo '[ERROR]: 2/5 obligations failed.'\nexit 1\n"),
        ),
    ];

    let outcome = ws.pipeline(2).run(jobs, CancellationToken::new()).await;
    let report = &outcome.report;

    assert_eq!(report.obligations_total, 15);
    assert_eq!(report.obligations_verified, 13);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.partial_count, 1);
    let b = report.per_job.iter().find(|r| r.job_id == "proof:B").unwrap();
    assert_eq!(b.status, JobStatus::Partial);
    assert_eq!((b.obligations_total, b.obligations_proved), (5, 3));
    assert_eq!(outcome.exit_code(), EXIT_PARTIAL);
}

#[tokio::test]
async fn scenario_persist_and_alert() {
    let ws = Workspace::new();
    let store = Arc::new(FileStateStore::new(ws.path().join("state")).unwrap());
    let chat = Arc::new(RecordingChannel::new("chat"));
    let alerts = AlertEngine::new(
        store.clone(),
        vec![chat.clone()],
        AlertConfig::with_threshold(90).rules,
        Duration::from_secs(3600),
    );
    let jobs = vec![
        JobDescriptor::new("native:ok", JobKind::NativeTest, "ok", ws.script("ok.sh", TESTS_PASS)),
        JobDescriptor::new("native:bad", JobKind::NativeTest, "bad", ws.script("bad.sh", "exit 101\n")),
    ];

    let outcome = ws
        .pipeline(2)
        .with_writer(ReportWriter::new(store.clone()))
        .with_alerts(alerts)
        .run(jobs, CancellationToken::new())
        .await;

    let version = outcome.version.expect("report persisted");
    assert!(ws.path().join("state").join(format!("{version}.json")).exists());
    assert!(ws.path().join("state/reports/latest.json").exists());
    // low_success_rate (50 < 90) and job_failures both fire.
    assert_eq!(outcome.alerts.iter().filter(|a| a.is_dispatched()).count(), 2);
    assert_eq!(chat.sent().len(), 2);
}

#[tokio::test]
async fn scenario_interrupt_keeps_completed_results() {
    let ws = Workspace::new();
    let jobs = vec![
        JobDescriptor::new("native:fast", JobKind::NativeTest, "fast", ws.script("fast.sh", TESTS_PASS)),
        JobDescriptor::new("native:slow", JobKind::NativeTest, "slow", ws.script("slow.sh", "sleep 10\n")),
    ];
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        trigger.cancel();
    });

    let begin = Instant::now();
    let outcome = ws.pipeline(2).run(jobs, shutdown).await;

    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(outcome.summary.interrupted);
    assert_eq!(outcome.exit_code(), vbatch_core::pipeline::EXIT_INTERRUPTED);
    let fast = outcome.report.per_job.iter().find(|r| r.job_id == "native:fast").unwrap();
    assert_eq!(fast.status, JobStatus::Success);
    let slow = outcome.report.per_job.iter().find(|r| r.job_id == "native:slow").unwrap();
    assert_eq!(slow.status, JobStatus::Timeout);
    assert!(slow.cancelled);
}
