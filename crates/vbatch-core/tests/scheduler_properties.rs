//! Scheduler properties: concurrency bound, completeness, fail-fast,
//! interrupt, panic isolation and aggregation laws.
//!
//! Uses `ScriptedExecutor` so timing is controlled and no processes spawn.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use vbatch_core::fakes::{JobScript, ScriptedExecutor};
use vbatch_core::{
    aggregate, JobDescriptor, JobKind, JobResult, JobStatus, Scheduler, SchedulerConfig,
};

fn jobs(n: usize) -> Vec<JobDescriptor> {
    (1..=n)
        .map(|i| {
            JobDescriptor::new(
                format!("job-{i}"),
                JobKind::ProofCheck,
                format!("Job {i}"),
                format!("proofs/Job{i}.tla"),
            )
        })
        .collect()
}

fn scheduler(executor: Arc<ScriptedExecutor>, config: SchedulerConfig) -> Scheduler {
    Scheduler::new(executor, config).expect("valid scheduler config")
}

fn ids(results: &[JobResult]) -> HashSet<String> {
    results.iter().map(|r| r.job_id.clone()).collect()
}

// ---------------------------------------------------------------------------
// Concurrency and completeness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrency_never_exceeds_max_parallel() {
    for max_parallel in [1, 2, 3, 8] {
        let executor = Arc::new(ScriptedExecutor::new(JobScript::new(
            JobStatus::Success,
            Duration::from_millis(20),
        )));
        let sched = scheduler(executor.clone(), SchedulerConfig::new(max_parallel));

        let (results, summary) = sched.run_to_completion(jobs(12), CancellationToken::new()).await;

        assert_eq!(results.len(), 12);
        assert!(
            executor.peak_concurrency() <= max_parallel,
            "peak {} > {max_parallel}",
            executor.peak_concurrency()
        );
        assert!(summary.peak_in_flight <= max_parallel);
        assert_eq!(summary.dispatched, 12);
    }
}

#[tokio::test]
async fn every_descriptor_gets_exactly_one_result() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(5)))
            .with_script("job-3", JobScript::new(JobStatus::Failed, Duration::from_millis(15)))
            .with_script("job-5", JobScript::new(JobStatus::Missing, Duration::ZERO))
            .with_script("job-7", JobScript::new(JobStatus::Partial, Duration::from_millis(1))),
    );
    let sched = scheduler(executor, SchedulerConfig::new(3));
    let submitted = jobs(9);
    let expected: HashSet<String> = submitted.iter().map(|d| d.id.clone()).collect();

    let (results, summary) = sched.run_to_completion(submitted, CancellationToken::new()).await;

    assert_eq!(results.len(), 9);
    assert_eq!(ids(&results), expected);
    assert_eq!(summary.results_sent, 9);
    assert!(!summary.interrupted);
    assert!(summary.fail_fast_trigger.is_none());
}

#[tokio::test]
async fn dispatch_preserves_submission_order() {
    let executor = Arc::new(ScriptedExecutor::new(JobScript::new(
        JobStatus::Success,
        Duration::from_millis(2),
    )));
    let sched = scheduler(executor.clone(), SchedulerConfig::new(1));
    let submitted = jobs(6);
    let order: Vec<String> = submitted.iter().map(|d| d.id.clone()).collect();

    sched.run_to_completion(submitted, CancellationToken::new()).await;

    assert_eq!(executor.started(), order);
}

#[tokio::test]
async fn zero_parallelism_is_rejected() {
    let executor = Arc::new(ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::ZERO)));
    let err = Scheduler::new(executor, SchedulerConfig::new(0)).err().expect("must reject");
    assert!(err.is_setup_error());
}

#[tokio::test]
async fn empty_run_completes_immediately() {
    let executor = Arc::new(ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::ZERO)));
    let sched = scheduler(executor, SchedulerConfig::new(2));
    let (results, summary) = sched.run_to_completion(Vec::new(), CancellationToken::new()).await;
    assert!(results.is_empty());
    assert_eq!(summary.submitted, 0);
}

// ---------------------------------------------------------------------------
// Fail-fast and interrupt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fail_fast_stops_dispatch_and_cancels_running_jobs() {
    let slow = JobScript::new(JobStatus::Success, Duration::from_secs(5));
    let executor = Arc::new(
        ScriptedExecutor::new(slow)
            .with_script("job-2", JobScript::new(JobStatus::Failed, Duration::from_millis(20))),
    );
    let sched = scheduler(executor.clone(), SchedulerConfig::new(2).with_fail_fast(true));

    let begin = Instant::now();
    let (results, summary) = sched.run_to_completion(jobs(5), CancellationToken::new()).await;

    assert!(begin.elapsed() < Duration::from_secs(3), "running jobs were not terminated");
    assert_eq!(results.len(), 5);
    assert_eq!(summary.fail_fast_trigger.as_deref(), Some("job-2"));
    assert!(!summary.interrupted);

    // Only the two jobs admitted before the failure ever started.
    let started: HashSet<String> = executor.started().into_iter().collect();
    assert_eq!(started, HashSet::from(["job-1".to_string(), "job-2".to_string()]));

    for result in &results {
        if result.job_id == "job-2" {
            assert_eq!(result.status, JobStatus::Failed);
            assert!(!result.cancelled);
        } else {
            assert_eq!(result.status, JobStatus::Timeout, "{}", result.job_id);
            assert!(result.cancelled, "{}", result.job_id);
        }
    }
}

#[tokio::test]
async fn without_fail_fast_failures_do_not_cancel() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(30)))
            .with_script("job-1", JobScript::new(JobStatus::Failed, Duration::from_millis(1))),
    );
    let sched = scheduler(executor, SchedulerConfig::new(2));

    let (results, summary) = sched.run_to_completion(jobs(5), CancellationToken::new()).await;

    assert!(summary.fail_fast_trigger.is_none());
    let report = aggregate(results);
    assert_eq!(report.success_count, 4);
    assert_eq!(report.failed_count, 1);
}

#[tokio::test]
async fn partial_and_missing_do_not_trip_fail_fast() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(10)))
            .with_script("job-1", JobScript::new(JobStatus::Partial, Duration::from_millis(1)))
            .with_script("job-2", JobScript::new(JobStatus::Missing, Duration::ZERO)),
    );
    let sched = scheduler(executor, SchedulerConfig::new(1).with_fail_fast(true));

    let (results, summary) = sched.run_to_completion(jobs(4), CancellationToken::new()).await;

    assert!(summary.fail_fast_trigger.is_none());
    assert!(results.iter().all(|r| !r.cancelled));
}

#[tokio::test]
async fn interrupt_yields_one_result_per_descriptor() {
    let executor = Arc::new(ScriptedExecutor::new(JobScript::new(
        JobStatus::Success,
        Duration::from_secs(10),
    )));
    let sched = scheduler(executor, SchedulerConfig::new(2));
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let begin = Instant::now();
    let (results, summary) = sched.run_to_completion(jobs(6), shutdown).await;

    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(summary.interrupted);
    assert_eq!(results.len(), 6);
    assert!(results
        .iter()
        .all(|r| r.status == JobStatus::Timeout && r.cancelled));
}

#[tokio::test]
async fn panicking_job_becomes_failed() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(5)))
            .with_script("job-2", JobScript::panicking(Duration::from_millis(1))),
    );
    let sched = scheduler(executor, SchedulerConfig::new(2));

    let (results, _) = sched.run_to_completion(jobs(4), CancellationToken::new()).await;

    assert_eq!(results.len(), 4);
    let panicked = results.iter().find(|r| r.job_id == "job-2").unwrap();
    assert_eq!(panicked.status, JobStatus::Failed);
    assert_eq!(
        results.iter().filter(|r| r.status == JobStatus::Success).count(),
        3
    );
}

#[tokio::test]
async fn results_stream_before_run_finishes() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(500)))
            .with_script("job-1", JobScript::new(JobStatus::Success, Duration::from_millis(1))),
    );
    let sched = scheduler(executor, SchedulerConfig::new(2));
    let mut handle = sched.run(jobs(2), CancellationToken::new());

    let first = handle.results.recv().await.unwrap();
    assert_eq!(first.job_id, "job-1");
    assert!(!handle.join.is_finished());

    let (rest, summary) = handle.collect().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(summary.results_sent, 2);
}

// ---------------------------------------------------------------------------
// Aggregation laws over real scheduler output
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aggregation_is_order_independent_and_idempotent() {
    let executor = Arc::new(
        ScriptedExecutor::new(JobScript::new(JobStatus::Success, Duration::from_millis(3)))
            .with_script(
                "job-2",
                JobScript::new(JobStatus::Partial, Duration::from_millis(7)).with_obligations(5, 3),
            )
            .with_script("job-4", JobScript::new(JobStatus::Failed, Duration::from_millis(1)))
            .with_script("job-6", JobScript::new(JobStatus::Timeout, Duration::from_millis(2))),
    );
    let sched = scheduler(executor, SchedulerConfig::new(3));
    let (results, _) = sched.run_to_completion(jobs(8), CancellationToken::new()).await;

    let baseline = aggregate(results.clone());

    let mut reversed = results.clone();
    reversed.reverse();
    assert_eq!(aggregate(reversed), baseline);

    let mut rotated = results.clone();
    rotated.rotate_left(3);
    assert_eq!(aggregate(rotated), baseline);

    assert_eq!(aggregate(results.clone()), aggregate(results));
    assert_eq!(aggregate(baseline.per_job.clone()), baseline);

    assert_eq!(
        baseline.success_count
            + baseline.failed_count
            + baseline.timeout_count
            + baseline.missing_count
            + baseline.partial_count,
        baseline.total_jobs
    );
    assert_eq!(baseline.partial_count, 1);
}
