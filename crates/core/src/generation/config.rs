//! Generation orchestration configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Highest number of simultaneous jobs the provider accepts per account.
pub const PROVIDER_CONCURRENCY_CEILING: usize = 5;

/// Configuration for batch generation, retries and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum simultaneous outstanding jobs, process-wide.
    /// Batch concurrency hints are clamped to this value.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries after the first attempt (attempts = max_retries + 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff schedule in milliseconds.
    /// The last entry is reused once retries outnumber the list.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,

    /// Substrings (case-insensitive) marking an error message as retryable.
    #[serde(default = "default_retry_keywords")]
    pub retry_keywords: Vec<String>,

    /// Resubmit jobs the provider reported as failed.
    #[serde(default = "default_true")]
    pub retry_task_failures: bool,

    /// How often to poll job status (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for one poll phase (milliseconds).
    #[serde(default = "default_max_poll_duration")]
    pub max_poll_duration_ms: u64,

    /// Directory downloaded videos are written to (created if absent).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Prefix of generated artifact filenames.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Below this batch success rate, suggest reducing concurrency.
    #[serde(default = "default_warn_success_rate")]
    pub warn_success_rate: f32,

    /// Below this batch success rate, also suggest simplifying prompts.
    #[serde(default = "default_critical_success_rate")]
    pub critical_success_rate: f32,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delays() -> Vec<u64> {
    vec![10_000, 20_000, 30_000]
}

fn default_retry_keywords() -> Vec<String> {
    ["timeout", "connection", "network", "temporary", "server", "failed"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_max_poll_duration() -> u64 {
    300_000 // 5 minutes
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output/videos")
}

fn default_file_prefix() -> String {
    "text_to_video".to_string()
}

fn default_warn_success_rate() -> f32 {
    0.8
}

fn default_critical_success_rate() -> f32 {
    0.6
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays(),
            retry_keywords: default_retry_keywords(),
            retry_task_failures: true,
            poll_interval_ms: default_poll_interval(),
            max_poll_duration_ms: default_max_poll_duration(),
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            warn_success_rate: default_warn_success_rate(),
            critical_success_rate: default_critical_success_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delays_ms, vec![10_000, 20_000, 30_000]);
        assert!(config.retry_keywords.contains(&"connection".to_string()));
        assert!(config.retry_task_failures);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.max_poll_duration_ms, 300_000);
        assert_eq!(config.warn_success_rate, 0.8);
        assert_eq!(config.critical_success_rate, 0.6);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            max_concurrency = 2
        "#;
        let config: GenerationConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_keywords.len(), 6);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_concurrency = 4
            max_retries = 1
            retry_delays_ms = [5000]
            retry_keywords = ["timeout"]
            retry_task_failures = false
            poll_interval_ms = 2000
            max_poll_duration_ms = 60000
            output_dir = "/data/videos"
            file_prefix = "scene"
            warn_success_rate = 0.9
            critical_success_rate = 0.5
        "#;
        let config: GenerationConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delays_ms, vec![5000]);
        assert_eq!(config.retry_keywords, vec!["timeout".to_string()]);
        assert!(!config.retry_task_failures);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.max_poll_duration_ms, 60000);
        assert_eq!(config.output_dir, PathBuf::from("/data/videos"));
        assert_eq!(config.file_prefix, "scene");
        assert_eq!(config.warn_success_rate, 0.9);
        assert_eq!(config.critical_success_rate, 0.5);
    }
}
