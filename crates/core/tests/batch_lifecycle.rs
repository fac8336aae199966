//! Batch generation integration tests.
//!
//! These tests drive the orchestrator end to end against the mock provider:
//! submit -> poll -> fetch outputs -> download, with retries and the shared
//! concurrency gate in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use reelsmith_core::{
    testing::{fixtures, MockVideoProvider, ScriptedAttempt},
    BatchOrchestrator, Config, ConcurrencyRegistry, GenerationError, ProviderError,
};

/// Test helper holding the mock provider and a scratch output directory.
struct TestHarness {
    provider: Arc<MockVideoProvider>,
    registry: ConcurrencyRegistry,
    config: Config,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = fixtures::config(temp_dir.path());

        Self {
            provider: Arc::new(MockVideoProvider::new()),
            registry: ConcurrencyRegistry::new(),
            config,
            _temp_dir: temp_dir,
        }
    }

    fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::from_config(
            self.provider.clone(),
            &self.config,
            self.registry.clone(),
        )
    }

    async fn script(&self, key: &str, attempts: Vec<ScriptedAttempt>) {
        self.provider.script(key, attempts).await;
    }
}

fn connection_timeout() -> ScriptedAttempt {
    ScriptedAttempt::submit_error(ProviderError::ConnectionFailed(
        "connection timeout".to_string(),
    ))
}

fn malformed() -> ScriptedAttempt {
    ScriptedAttempt::submit_error(ProviderError::InvalidResponse(
        "malformed payload".to_string(),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let mut harness = TestHarness::new();
    harness.config.generation.max_retries = 2;
    harness.config.generation.retry_delays_ms = vec![1_000, 2_000];

    harness
        .script(
            "lantern",
            vec![connection_timeout(), connection_timeout(), ScriptedAttempt::succeed()],
        )
        .await;

    let orchestrator = harness.orchestrator();
    let started = Instant::now();
    let result = assert_ok!(
        orchestrator
            .generate_one(&fixtures::job_request("lantern"))
            .await
    );
    let elapsed = started.elapsed();

    assert!(result.video_path.exists());
    assert_eq!(harness.provider.submissions_for("lantern").await.len(), 3);
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_keyword_errors_exhaust_delay_schedule() {
    let mut harness = TestHarness::new();
    harness.config.generation.max_retries = 3;
    harness.config.generation.retry_delays_ms = vec![1_000, 2_000];

    harness
        .script("fog", (0..4).map(|_| connection_timeout()).collect())
        .await;

    let err = assert_err!(
        harness
            .orchestrator()
            .generate_one(&fixtures::job_request("fog"))
            .await
    );
    match err {
        GenerationError::RetriesExhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 4);
            assert!(last_error.to_string().contains("connection timeout"));
        }
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }

    let submissions = harness.provider.submissions_for("fog").await;
    assert_eq!(submissions.len(), 4);
    let gaps: Vec<Duration> = submissions
        .windows(2)
        .map(|pair| pair[1].at - pair[0].at)
        .collect();
    // last delay is reused once the schedule runs out
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(2)
        ]
    );
    assert!(harness.provider.cancelled().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_leaves_gap() {
    let harness = TestHarness::new();
    harness.script("s2", vec![malformed()]).await;

    let requests = fixtures::job_requests(&["s0", "s1", "s2", "s3", "s4"]);
    let batch = assert_ok!(harness.orchestrator().generate_batch(&requests, 3).await);

    assert_eq!(batch.len(), 5);
    assert_eq!(batch.success_count(), 4);
    assert_eq!(batch.failed_indices(), vec![2]);
    assert!(batch.get(2).is_none());
    for index in [0, 1, 3, 4] {
        let result = batch.get(index).unwrap();
        assert_eq!(result.index, index);
    }
    assert_eq!(harness.provider.submissions_for("s2").await.len(), 1);
    assert_eq!(batch.summary().success_rate, 0.8);
}

#[tokio::test(start_paused = true)]
async fn test_all_requests_fail() {
    let harness = TestHarness::new();
    let keys = ["f0", "f1", "f2", "f3", "f4"];
    for key in keys {
        harness.script(key, vec![malformed()]).await;
    }

    let err = assert_err!(
        harness
            .orchestrator()
            .generate_batch(&fixtures::job_requests(&keys), 3)
            .await
    );
    assert!(matches!(err, GenerationError::AllJobsFailed { total: 5, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_one_delay_and_keeps_order() {
    let mut harness = TestHarness::new();
    harness.config.generation.max_retries = 1;
    harness.config.generation.retry_delays_ms = vec![5_000];

    harness
        .script("A", vec![ScriptedAttempt::succeed().with_pending_polls(1)])
        .await;
    harness
        .script("B", vec![connection_timeout(), ScriptedAttempt::succeed()])
        .await;
    harness
        .script("C", vec![ScriptedAttempt::succeed().with_pending_polls(1)])
        .await;

    let requests = fixtures::job_requests(&["A", "B", "C"]);
    let batch = assert_ok!(harness.orchestrator().generate_batch(&requests, 2).await);

    assert_eq!(batch.success_count(), 3);
    for (index, key) in ["A", "B", "C"].iter().enumerate() {
        let result = batch.get(index).unwrap();
        let name = result.video_path.file_name().unwrap().to_str().unwrap();
        assert!(
            name.starts_with(&format!("text_to_video_{}_", key)),
            "slot {} holds {}",
            index,
            name
        );
    }

    let b = harness.provider.submissions_for("B").await;
    assert_eq!(b.len(), 2);
    let gap = b[1].at - b[0].at;
    assert!(gap >= Duration::from_secs(5), "gap {:?}", gap);
    assert!(gap < Duration::from_secs(6), "gap {:?}", gap);

    // C takes the permit B released instead of waiting out B's backoff.
    let c = harness.provider.submissions_for("C").await;
    assert!(c[0].at < b[1].at);

    let gate = harness.registry.current().unwrap();
    assert_eq!(gate.bound(), 2);
    assert_eq!(gate.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gate_bound_never_exceeded() {
    let harness = TestHarness::new();
    let keys: Vec<String> = (0..12).map(|i| format!("clip-{}", i)).collect();
    for (i, key) in keys.iter().enumerate() {
        harness
            .script(
                key,
                vec![ScriptedAttempt::succeed().with_pending_polls(i % 4 + 1)],
            )
            .await;
    }

    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let batch = assert_ok!(
        harness
            .orchestrator()
            .generate_batch(&fixtures::job_requests(&key_refs), 10)
            .await
    );

    assert_eq!(batch.success_count(), 12);
    let gate = harness.registry.current().unwrap();
    assert_eq!(gate.bound(), 3);
    assert_eq!(gate.peak_in_flight(), 3);
    assert_eq!(gate.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_result_length_matches_requests() {
    let harness = TestHarness::new();
    let keys: Vec<String> = (0..9).map(|i| format!("mix-{}", i)).collect();
    for (i, key) in keys.iter().enumerate() {
        let attempts = match i % 3 {
            0 => vec![malformed()],
            1 => vec![connection_timeout(), ScriptedAttempt::succeed()],
            _ => vec![ScriptedAttempt::succeed().with_pending_polls(2)],
        };
        harness.script(key, attempts).await;
    }

    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let requests = fixtures::job_requests(&key_refs);
    let batch = assert_ok!(harness.orchestrator().generate_batch(&requests, 2).await);

    assert_eq!(batch.len(), requests.len());
    assert_eq!(batch.failed_indices(), vec![0, 3, 6]);
    for result in batch.successful() {
        assert_eq!(requests[result.index].scene_id, keys[result.index]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_jobs_cancelled_exactly_once() {
    let mut harness = TestHarness::new();
    harness.config.generation.max_retries = 2;
    harness.config.generation.retry_delays_ms = vec![1_000];
    harness.config.generation.max_poll_duration_ms = 3_000;

    harness
        .script(
            "stuck",
            vec![
                ScriptedAttempt::never_finishes(),
                ScriptedAttempt::task_failure("worker crashed"),
                ScriptedAttempt::succeed(),
            ],
        )
        .await;
    harness
        .script(
            "hopeless",
            vec![
                ScriptedAttempt::never_finishes(),
                ScriptedAttempt::never_finishes(),
                ScriptedAttempt::never_finishes(),
            ],
        )
        .await;

    let requests = fixtures::job_requests(&["stuck", "hopeless", "fine"]);
    let batch = assert_ok!(harness.orchestrator().generate_batch(&requests, 3).await);
    assert_eq!(batch.failed_indices(), vec![1]);

    let mut cancel_counts: HashMap<String, usize> = HashMap::new();
    for job_id in harness.provider.cancelled().await {
        *cancel_counts.entry(job_id).or_default() += 1;
    }

    let mut abandoned = Vec::new();
    for key in ["stuck", "hopeless"] {
        for submission in harness.provider.submissions_for(key).await {
            abandoned.extend(submission.job_id);
        }
    }
    let winner = batch.get(0).unwrap().job_id.clone();
    abandoned.retain(|id| *id != winner);

    assert_eq!(abandoned.len(), 5);
    for job_id in &abandoned {
        assert_eq!(cancel_counts.get(job_id), Some(&1), "job {}", job_id);
    }
    assert_eq!(cancel_counts.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_is_not_retried() {
    let harness = TestHarness::new();
    harness.script("busy", vec![ScriptedAttempt::queue_full()]).await;

    let requests = fixtures::job_requests(&["busy", "calm"]);
    let batch = assert_ok!(harness.orchestrator().generate_batch(&requests, 2).await);

    assert_eq!(batch.failed_indices(), vec![0]);
    assert_eq!(harness.provider.submissions_for("busy").await.len(), 1);
}
