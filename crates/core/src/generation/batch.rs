//! Batch fan-out over the retry coordinator.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::provider::VideoProvider;

use super::config::GenerationConfig;
use super::gate::{ConcurrencyGate, ConcurrencyRegistry};
use super::lifecycle::JobLifecycle;
use super::retry::{RetryCoordinator, RetryPolicy};
use super::types::{BatchResult, GenerationError, JobRequest, JobResult};

/// Advice derived from a batch's success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchHealth {
    Healthy,
    /// Below the warn threshold.
    Degraded,
    /// Below the critical threshold.
    Critical,
}

impl BatchHealth {
    pub fn from_rate(success_rate: f32, config: &GenerationConfig) -> Self {
        if success_rate < config.critical_success_rate {
            BatchHealth::Critical
        } else if success_rate < config.warn_success_rate {
            BatchHealth::Degraded
        } else {
            BatchHealth::Healthy
        }
    }

    /// Operator guidance to log with the batch summary.
    pub fn advice(&self) -> Option<&'static str> {
        match self {
            BatchHealth::Healthy => None,
            BatchHealth::Degraded => Some("consider reducing max_concurrency"),
            BatchHealth::Critical => Some(
                "reduce max_concurrency and simplify prompts; \
                 check failed tasks for content-filter rejections",
            ),
        }
    }
}

/// Generates batches of clips with bounded concurrency.
///
/// All orchestrators built from the same [`ConcurrencyRegistry`] share one
/// gate, so separate instances cannot jointly exceed the provider limit.
pub struct BatchOrchestrator {
    lifecycle: Arc<JobLifecycle>,
    policy: RetryPolicy,
    config: GenerationConfig,
    registry: ConcurrencyRegistry,
}

impl BatchOrchestrator {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        policy: RetryPolicy,
        config: GenerationConfig,
        registry: ConcurrencyRegistry,
    ) -> Self {
        Self {
            lifecycle,
            policy,
            config,
            registry,
        }
    }

    /// Build an orchestrator for `provider` from application config.
    pub fn from_config(
        provider: Arc<dyn VideoProvider>,
        config: &Config,
        registry: ConcurrencyRegistry,
    ) -> Self {
        let lifecycle = Arc::new(JobLifecycle::new(
            provider,
            config.provider.workflow_id.clone(),
            config.workflow.clone(),
            &config.generation,
        ));
        Self::new(
            lifecycle,
            RetryPolicy::from_config(&config.generation),
            config.generation.clone(),
            registry,
        )
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Clamp a caller's concurrency hint to `[1, max_concurrency]`.
    pub fn effective_concurrency(&self, hint: usize) -> usize {
        hint.clamp(1, self.config.max_concurrency.max(1))
    }

    /// Generate a single clip with retries, sharing the installed gate.
    pub async fn generate_one(&self, request: &JobRequest) -> Result<JobResult, GenerationError> {
        let gate = self
            .registry
            .current()
            .unwrap_or_else(|| self.registry.gate(self.config.max_concurrency));
        self.coordinator(gate).execute(0, request).await
    }

    /// Generate every request, at most `concurrency` jobs at a time.
    ///
    /// The result has one slot per request in input order. Failed requests
    /// leave an empty slot; the call fails only if nothing succeeded.
    pub async fn generate_batch(
        &self,
        requests: &[JobRequest],
        concurrency: usize,
    ) -> Result<BatchResult, GenerationError> {
        if requests.is_empty() {
            info!("Empty batch, nothing to generate");
            return Ok(BatchResult::new(Vec::new(), std::time::Duration::ZERO));
        }

        let started = Instant::now();
        let concurrency = self.effective_concurrency(concurrency);
        let coordinator = self.coordinator(self.registry.gate(concurrency));

        info!(
            "Starting batch of {} jobs on {} (concurrency {}, max attempts {})",
            requests.len(),
            self.lifecycle.provider_name(),
            concurrency,
            self.policy.max_attempts()
        );

        let coordinator = &coordinator;
        let outcomes = join_all(requests.iter().enumerate().map(|(index, request)| async move {
            (index, coordinator.execute(index, request).await)
        }))
        .await;

        let mut slots: Vec<Option<JobResult>> = vec![None; requests.len()];
        let mut first_error: Option<String> = None;

        for (index, outcome) in outcomes {
            match outcome {
                Ok(result) => slots[index] = Some(result),
                Err(e) => {
                    warn!("Request {} (scene {:?}) failed: {}", index, requests[index].scene_id, e);
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                }
            }
        }

        let batch = BatchResult::new(slots, started.elapsed());
        let summary = batch.summary();
        metrics::BATCH_SUCCESS_RATE.set(summary.success_rate as f64);

        info!(
            "Batch finished: {}/{} succeeded ({:.0}%) in {:.1}s",
            summary.succeeded,
            summary.total,
            summary.success_rate * 100.0,
            summary.elapsed_ms as f64 / 1000.0
        );
        if !summary.failed_indices.is_empty() {
            warn!("Failed request indices: {:?}", summary.failed_indices);
        }

        let health = BatchHealth::from_rate(summary.success_rate, &self.config);
        if let Some(advice) = health.advice() {
            let level = if health == BatchHealth::Critical {
                "critically low"
            } else {
                "low"
            };
            warn!(
                "Success rate {:.0}% is {}: {}",
                summary.success_rate * 100.0,
                level,
                advice
            );
        }

        if summary.succeeded == 0 {
            error!("All {} jobs in the batch failed", summary.total);
            return Err(GenerationError::AllJobsFailed {
                total: summary.total,
                first_error: first_error.unwrap_or_default(),
            });
        }

        Ok(batch)
    }

    fn coordinator(&self, gate: Arc<ConcurrencyGate>) -> RetryCoordinator {
        RetryCoordinator::new(Arc::clone(&self.lifecycle), self.policy.clone(), gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::testing::{fixtures, MockVideoProvider, ScriptedAttempt};

    fn orchestrator(
        provider: Arc<MockVideoProvider>,
        dir: &std::path::Path,
        registry: ConcurrencyRegistry,
    ) -> BatchOrchestrator {
        BatchOrchestrator::from_config(provider, &fixtures::config(dir), registry)
    }

    #[test]
    fn test_effective_concurrency_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            Arc::new(MockVideoProvider::new()),
            dir.path(),
            ConcurrencyRegistry::new(),
        );
        assert_eq!(orchestrator.effective_concurrency(0), 1);
        assert_eq!(orchestrator.effective_concurrency(2), 2);
        assert_eq!(orchestrator.effective_concurrency(50), 3);
    }

    #[test]
    fn test_batch_health_thresholds() {
        let config = GenerationConfig::default();
        assert_eq!(BatchHealth::from_rate(1.0, &config), BatchHealth::Healthy);
        assert_eq!(BatchHealth::from_rate(0.8, &config), BatchHealth::Healthy);
        assert_eq!(BatchHealth::from_rate(0.7, &config), BatchHealth::Degraded);
        assert_eq!(BatchHealth::from_rate(0.4, &config), BatchHealth::Critical);
    }

    #[test]
    fn test_batch_health_advice() {
        assert_eq!(BatchHealth::Healthy.advice(), None);
        assert!(BatchHealth::Degraded
            .advice()
            .unwrap()
            .contains("max_concurrency"));

        let critical = BatchHealth::Critical.advice().unwrap();
        assert!(critical.contains("reduce max_concurrency"));
        assert!(critical.contains("simplify prompts"));
        assert!(critical.contains("content-filter"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockVideoProvider::new());
        let orchestrator = orchestrator(
            Arc::clone(&provider),
            dir.path(),
            ConcurrencyRegistry::new(),
        );

        let batch = orchestrator.generate_batch(&[], 3).await.unwrap();
        assert!(batch.is_empty());
        assert!(provider.submissions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_one_uses_installed_gate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConcurrencyRegistry::new();
        let provider = Arc::new(MockVideoProvider::new());
        let orchestrator = orchestrator(Arc::clone(&provider), dir.path(), registry.clone());

        let installed = registry.gate(2);
        let result = orchestrator
            .generate_one(&fixtures::job_request("solo"))
            .await
            .unwrap();

        assert_eq!(result.index, 0);
        assert!(Arc::ptr_eq(&installed, &registry.current().unwrap()));
        assert_eq!(installed.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orchestrators_share_registry_gate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConcurrencyRegistry::new();
        let provider = Arc::new(MockVideoProvider::new());
        for key in ["a", "b", "c", "d"] {
            provider
                .script(key, vec![ScriptedAttempt::succeed().with_pending_polls(3)])
                .await;
        }

        let first = orchestrator(Arc::clone(&provider), dir.path(), registry.clone());
        let second = orchestrator(Arc::clone(&provider), dir.path(), registry.clone());

        let left = fixtures::job_requests(&["a", "b"]);
        let right = fixtures::job_requests(&["c", "d"]);
        let (x, y) = tokio::join!(
            first.generate_batch(&left, 2),
            second.generate_batch(&right, 2)
        );

        assert_eq!(x.unwrap().success_count(), 2);
        assert_eq!(y.unwrap().success_count(), 2);
        assert_eq!(registry.current().unwrap().peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_batch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockVideoProvider::new());
        for key in ["x", "y"] {
            provider
                .script(
                    key,
                    vec![ScriptedAttempt::submit_error(ProviderError::InvalidResponse(
                        "bad payload".into(),
                    ))],
                )
                .await;
        }
        let orchestrator = orchestrator(
            Arc::clone(&provider),
            dir.path(),
            ConcurrencyRegistry::new(),
        );

        let err = orchestrator
            .generate_batch(&fixtures::job_requests(&["x", "y"]), 2)
            .await
            .unwrap_err();
        match err {
            GenerationError::AllJobsFailed { total, first_error } => {
                assert_eq!(total, 2);
                assert!(first_error.contains("bad payload"));
            }
            other => panic!("Expected AllJobsFailed, got {:?}", other),
        }
    }
}
