//! Testing utilities and a mock provider for end-to-end tests.
//!
//! The mock stands in for the remote compute API so that batches, retries
//! and the concurrency gate can be exercised without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use reelsmith_core::testing::{fixtures, MockVideoProvider, ScriptedAttempt};
//!
//! let provider = Arc::new(MockVideoProvider::new());
//! provider.script("scene-1", vec![ScriptedAttempt::never_finishes()]).await;
//!
//! let requests = fixtures::job_requests(&["scene-0", "scene-1"]);
//! ```

mod mock_provider;

pub use mock_provider::{MockVideoProvider, RecordedSubmission, ScriptedAttempt, DEFAULT_PAYLOAD};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::config::{Config, ProviderConfig, WorkflowConfig};
    use crate::generation::{GenerationConfig, JobRequest};

    /// A request whose image prompt and scene id are both `key`.
    ///
    /// The mock provider matches scripts on the image prompt, so `key` is
    /// also the script key.
    pub fn job_request(key: &str) -> JobRequest {
        JobRequest::new(key)
            .with_video_prompt(format!("{} slowly comes to life", key))
            .with_scene_id(key)
    }

    /// One request per key, in order.
    pub fn job_requests(keys: &[&str]) -> Vec<JobRequest> {
        keys.iter().map(|k| job_request(k)).collect()
    }

    /// Generation settings with short timings, writing into `output_dir`.
    pub fn generation_config(output_dir: &Path) -> GenerationConfig {
        GenerationConfig {
            max_concurrency: 3,
            max_retries: 2,
            retry_delays_ms: vec![1_000, 2_000],
            poll_interval_ms: 1_000,
            max_poll_duration_ms: 30_000,
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        }
    }

    /// A full config pointing at a fake endpoint.
    pub fn config(output_dir: &Path) -> Config {
        Config {
            provider: ProviderConfig {
                api_key: "test-key".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                workflow_id: "wf-test".to_string(),
                connect_timeout_secs: 1,
                request_timeout_secs: 1,
                download_timeout_secs: 1,
            },
            workflow: WorkflowConfig::default(),
            generation: generation_config(output_dir),
        }
    }
}
