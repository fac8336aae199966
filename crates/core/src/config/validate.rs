use super::{types::Config, ConfigError};
use crate::generation::PROVIDER_CONCURRENCY_CEILING;

/// Validate configuration
/// Currently validates:
/// - Provider API key, base URL and workflow id are set
/// - Concurrency bound is within the provider ceiling
/// - Poll interval and poll budget are usable
/// - At least one retry keyword exists
/// - Success-rate thresholds are ordered fractions
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let provider = &config.provider;
    if provider.api_key.trim().is_empty() {
        return Err(invalid("provider.api_key cannot be empty"));
    }
    if provider.base_url.trim().is_empty() {
        return Err(invalid("provider.base_url cannot be empty"));
    }
    if provider.workflow_id.trim().is_empty() {
        return Err(invalid("provider.workflow_id cannot be empty"));
    }

    let generation = &config.generation;
    if generation.max_concurrency == 0 || generation.max_concurrency > PROVIDER_CONCURRENCY_CEILING
    {
        return Err(invalid(&format!(
            "generation.max_concurrency must be between 1 and {}",
            PROVIDER_CONCURRENCY_CEILING
        )));
    }
    if generation.poll_interval_ms == 0 {
        return Err(invalid("generation.poll_interval_ms cannot be 0"));
    }
    if generation.max_poll_duration_ms < generation.poll_interval_ms {
        return Err(invalid(
            "generation.max_poll_duration_ms must be at least poll_interval_ms",
        ));
    }
    if generation.retry_keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(invalid("generation.retry_keywords cannot be empty"));
    }

    let warn = generation.warn_success_rate;
    let critical = generation.critical_success_rate;
    if !(0.0..=1.0).contains(&warn) || !(0.0..=1.0).contains(&critical) {
        return Err(invalid("success-rate thresholds must be between 0.0 and 1.0"));
    }
    if critical > warn {
        return Err(invalid(
            "generation.critical_success_rate cannot exceed warn_success_rate",
        ));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
