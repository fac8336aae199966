pub mod config;
pub mod generation;
pub mod metrics;
pub mod provider;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ProviderConfig,
    SanitizedConfig, WorkflowConfig,
};
pub use generation::{
    BatchHealth, BatchOrchestrator, BatchResult, BatchSummary, ConcurrencyGate,
    ConcurrencyRegistry, ErrorClass, GenerationConfig, GenerationError, JobHandle, JobLifecycle,
    JobRequest, JobResult, JobStatus, RetryCoordinator, RetryPolicy,
};
pub use provider::{
    Artifact, NodeField, ProviderError, RemoteStatus, RunningHubProvider, VideoProvider,
};
