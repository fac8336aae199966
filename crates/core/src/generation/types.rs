//! Types for remote video generation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur while generating videos.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider call failed (network, HTTP, malformed payload).
    #[error(transparent)]
    Provider(ProviderError),

    /// The provider's pending queue is at capacity.
    #[error("provider queue is full, reduce concurrency: {0}")]
    QueueFull(String),

    /// The provider reported the job as failed.
    #[error("task {job_id} failed: {reason}")]
    TaskFailed { job_id: String, reason: String },

    /// The job did not reach a terminal status within the poll budget.
    #[error("poll timeout: task {job_id} unfinished after {}s", .waited.as_secs())]
    PollTimeout { job_id: String, waited: Duration },

    /// The job finished without any output artifact.
    #[error("task {job_id} finished without output artifacts")]
    NoArtifacts { job_id: String },

    /// The downloaded artifact has no content.
    #[error("download failed: empty artifact at {}", .path.display())]
    EmptyDownload { path: PathBuf },

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The concurrency gate was closed while waiting for a permit.
    #[error("concurrency gate closed")]
    GateClosed,

    /// Every attempt allowed by the retry policy failed.
    #[error(
        "generation gave up after {attempts} attempts in {:.1}s: {last_error}",
        .elapsed.as_secs_f64()
    )]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: Box<GenerationError>,
    },

    /// No job in a non-empty batch succeeded.
    #[error("all {total} jobs in the batch failed (first error: {first_error})")]
    AllJobsFailed { total: usize, first_error: String },
}

impl From<ProviderError> for GenerationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::QueueFull(message) => GenerationError::QueueFull(message),
            other => GenerationError::Provider(other),
        }
    }
}

impl GenerationError {
    /// Whether the provider rejected work for lack of capacity.
    pub fn is_capacity_rejection(&self) -> bool {
        match self {
            GenerationError::QueueFull(_) => true,
            GenerationError::RetriesExhausted { last_error, .. } => {
                last_error.is_capacity_rejection()
            }
            _ => false,
        }
    }
}

/// A request for one scene's video clip.
///
/// Built once and never mutated; the `with_*` builders consume and return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Prompt for the still image the clip starts from.
    pub image_prompt: String,
    /// Prompt describing motion; falls back to `image_prompt` when empty.
    #[serde(default)]
    pub video_prompt: String,
    /// Negative prompt; falls back to the workflow default when empty.
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Target clip length in seconds.
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
    /// Correlates the clip with the scene that asked for it.
    #[serde(default)]
    pub scene_id: String,
    /// Fixed noise seed; random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Style tag carried through for the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

fn default_width() -> u32 {
    720
}

fn default_height() -> u32 {
    1280
}

fn default_fps() -> u32 {
    31
}

fn default_duration() -> f64 {
    3.0
}

impl JobRequest {
    /// Create a portrait 720x1280 request with default timing.
    pub fn new(image_prompt: impl Into<String>) -> Self {
        Self {
            image_prompt: image_prompt.into(),
            video_prompt: String::new(),
            negative_prompt: String::new(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            duration_secs: default_duration(),
            scene_id: String::new(),
            seed: None,
            style: None,
        }
    }

    pub fn with_video_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.video_prompt = prompt.into();
        self
    }

    pub fn with_negative_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_timing(mut self, fps: u32, duration_secs: f64) -> Self {
        self.fps = fps;
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_scene_id(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = scene_id.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// The motion prompt actually sent to the provider.
    pub fn effective_video_prompt(&self) -> &str {
        if self.video_prompt.trim().is_empty() {
            &self.image_prompt
        } else {
            &self.video_prompt
        }
    }
}

/// Provider-assigned id of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local view of a job attempt's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::Running => next != JobStatus::Pending && next != JobStatus::Running,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// A downloaded clip and what is known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Position of the originating request in the batch.
    pub index: usize,
    /// Local path of the downloaded video.
    pub video_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_secs: f64,
    pub file_size: u64,
    /// Provider that produced the clip.
    pub provider: String,
    pub workflow_id: String,
    /// Remote id of the attempt that succeeded.
    pub job_id: String,
    /// Wall-clock time of the successful attempt.
    pub generation_time_ms: u64,
}

/// Index-aligned outcome of a batch: one slot per request, `None` where the
/// request failed.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    slots: Vec<Option<JobResult>>,
    elapsed_ms: u64,
}

impl BatchResult {
    pub fn new(slots: Vec<Option<JobResult>>, elapsed: Duration) -> Self {
        Self {
            slots,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Result at `index`, `None` if that request failed or is out of range.
    pub fn get(&self, index: usize) -> Option<&JobResult> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slots(&self) -> &[Option<JobResult>] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<Option<JobResult>> {
        self.slots
    }

    pub fn successful(&self) -> impl Iterator<Item = &JobResult> {
        self.slots.iter().flatten()
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Fraction of successful slots; 0.0 for an empty batch.
    pub fn success_rate(&self) -> f32 {
        if self.slots.is_empty() {
            0.0
        } else {
            self.success_count() as f32 / self.slots.len() as f32
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.len(),
            succeeded: self.success_count(),
            failed_indices: self.failed_indices(),
            success_rate: self.success_rate(),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Aggregate figures of a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_indices: Vec<usize>,
    pub success_rate: f32,
    pub elapsed_ms: u64,
}
