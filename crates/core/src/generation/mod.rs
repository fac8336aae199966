//! Remote video generation: concurrency gating, job lifecycle, retries and
//! batch fan-out.
//!
//! A batch runs every request concurrently, each one through a
//! [`RetryCoordinator`] that resubmits failed attempts. Every attempt holds
//! a permit from the shared [`ConcurrencyGate`] from submission until its
//! artifact is downloaded.

mod batch;
mod config;
mod gate;
mod lifecycle;
mod retry;
mod types;

pub use batch::{BatchHealth, BatchOrchestrator};
pub use config::{GenerationConfig, PROVIDER_CONCURRENCY_CEILING};
pub use gate::{ConcurrencyGate, ConcurrencyRegistry, GatePermit};
pub use lifecycle::{
    frame_count, select_artifact, AttemptFailure, JobAttempt, JobLifecycle, MAX_FRAMES, MIN_FRAMES,
};
pub use retry::{ErrorClass, RetryCoordinator, RetryPolicy};
pub use types::{
    BatchResult, BatchSummary, GenerationError, JobHandle, JobRequest, JobResult, JobStatus,
};
