//! One attempt at a remote job: submit, poll, fetch outputs, download.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::metrics;
use crate::provider::{Artifact, NodeField, RemoteStatus, VideoProvider};

use super::config::GenerationConfig;
use super::types::{GenerationError, JobHandle, JobRequest, JobResult, JobStatus};

/// Fewest frames the workflow accepts.
pub const MIN_FRAMES: u32 = 16;
/// Most frames the workflow accepts.
pub const MAX_FRAMES: u32 = 800;

/// Extensions recognised as video artifacts.
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".webm", ".mkv"];

/// Frame count for a clip of `duration_secs` at `fps`, clamped to what the
/// workflow accepts.
pub fn frame_count(duration_secs: f64, fps: u32) -> u32 {
    let frames = (duration_secs.max(0.0) * fps as f64).floor();
    (frames.min(MAX_FRAMES as f64) as u32).max(MIN_FRAMES)
}

/// Pick the artifact to download: the first video, else the first of any kind.
pub fn select_artifact(artifacts: &[Artifact]) -> Option<&Artifact> {
    artifacts
        .iter()
        .find(|a| is_video_url(&a.url))
        .or_else(|| artifacts.first())
}

fn is_video_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// A submitted job and its local status.
#[derive(Debug, Clone)]
pub struct JobAttempt {
    pub handle: JobHandle,
    status: JobStatus,
}

impl JobAttempt {
    fn new(handle: JobHandle) -> Self {
        Self {
            handle,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next` if that keeps the status monotonic.
    fn advance(&mut self, next: JobStatus) {
        if self.status == next {
            return;
        }
        if self.status.can_transition_to(next) {
            debug!(
                "Job {}: {} -> {}",
                self.handle,
                self.status.as_str(),
                next.as_str()
            );
            self.status = next;
        } else {
            debug!(
                "Job {}: ignoring transition {} -> {}",
                self.handle,
                self.status.as_str(),
                next.as_str()
            );
        }
    }
}

/// Why an attempt ended without a result.
#[derive(Debug)]
pub struct AttemptFailure {
    /// Handle of the submitted job, if submission got that far.
    pub handle: Option<JobHandle>,
    /// Local status when the attempt stopped.
    pub status: Option<JobStatus>,
    pub error: GenerationError,
}

impl AttemptFailure {
    fn before_submit(error: GenerationError) -> Self {
        Self {
            handle: None,
            status: None,
            error,
        }
    }

    fn after_submit(attempt: &JobAttempt, error: GenerationError) -> Self {
        Self {
            handle: Some(attempt.handle.clone()),
            status: Some(attempt.status),
            error,
        }
    }
}

/// Drives single job attempts against a provider.
pub struct JobLifecycle {
    provider: Arc<dyn VideoProvider>,
    workflow_id: String,
    workflow: WorkflowConfig,
    poll_interval: Duration,
    max_poll_duration: Duration,
    output_dir: PathBuf,
    file_prefix: String,
}

impl JobLifecycle {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        workflow_id: impl Into<String>,
        workflow: WorkflowConfig,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            provider,
            workflow_id: workflow_id.into(),
            workflow,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_duration: Duration::from_millis(config.max_poll_duration_ms),
            output_dir: config.output_dir.clone(),
            file_prefix: config.file_prefix.clone(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Field overrides for the workflow submission.
    pub fn build_fields(&self, request: &JobRequest) -> Vec<NodeField> {
        let nodes = &self.workflow;
        let negative = if request.negative_prompt.trim().is_empty() {
            nodes.default_negative_prompt.as_str()
        } else {
            request.negative_prompt.as_str()
        };

        let mut fields = vec![
            NodeField::new(&nodes.image_prompt_node, "text", request.image_prompt.as_str()),
            NodeField::new(
                &nodes.video_prompt_node,
                "text",
                request.effective_video_prompt(),
            ),
            NodeField::new(&nodes.negative_prompt_node, "text", negative),
            NodeField::new(&nodes.resolution_node, "width", request.width),
            NodeField::new(&nodes.resolution_node, "height", request.height),
        ];

        if let Some(frames_node) = &nodes.frames_node {
            fields.push(NodeField::new(
                frames_node,
                "length",
                frame_count(request.duration_secs, request.fps),
            ));
        }

        if let Some(seed) = request.seed.filter(|s| *s > 0) {
            fields.push(NodeField::new(&nodes.seed_node, "noise_seed", seed));
        }

        fields
    }

    /// Submit a new job for `request`.
    pub async fn submit(&self, request: &JobRequest) -> Result<JobHandle, GenerationError> {
        let fields = self.build_fields(request);
        debug!(
            "Submitting workflow {} with {} field overrides",
            self.workflow_id,
            fields.len()
        );

        let job_id = self.provider.create_job(&self.workflow_id, &fields).await?;
        metrics::JOBS_SUBMITTED.inc();
        Ok(JobHandle::new(job_id))
    }

    /// Poll until the job succeeds, fails, or the poll budget runs out.
    ///
    /// Transport errors while polling are logged and polling continues.
    pub async fn poll(&self, attempt: &mut JobAttempt) -> Result<(), GenerationError> {
        let started = Instant::now();

        loop {
            match self.provider.status(attempt.handle.as_str()).await {
                Ok(RemoteStatus::Succeeded) => {
                    attempt.advance(JobStatus::Succeeded);
                    info!("Job {} completed", attempt.handle);
                    return Ok(());
                }
                Ok(RemoteStatus::Failed { reason }) => {
                    attempt.advance(JobStatus::Failed);
                    return Err(GenerationError::TaskFailed {
                        job_id: attempt.handle.to_string(),
                        reason: reason.unwrap_or_else(|| "no diagnostic from provider".to_string()),
                    });
                }
                Ok(status) if status.is_in_progress() => {
                    if status != RemoteStatus::Pending {
                        attempt.advance(JobStatus::Running);
                    }
                    debug!("Job {} status: {:?}", attempt.handle, status);
                }
                Ok(status) => {
                    warn!("Job {} reported unexpected status {:?}", attempt.handle, status);
                }
                Err(e) => {
                    warn!("Status poll for job {} failed: {}", attempt.handle, e);
                }
            }

            tokio::time::sleep(self.poll_interval).await;

            let waited = started.elapsed();
            if waited >= self.max_poll_duration {
                attempt.advance(JobStatus::TimedOut);
                return Err(GenerationError::PollTimeout {
                    job_id: attempt.handle.to_string(),
                    waited,
                });
            }
        }
    }

    /// Choose the artifact to download from a finished job.
    pub async fn fetch_output(&self, handle: &JobHandle) -> Result<Artifact, GenerationError> {
        let artifacts = self.provider.outputs(handle.as_str()).await?;

        match select_artifact(&artifacts) {
            Some(artifact) => {
                if !is_video_url(&artifact.url) {
                    warn!(
                        "Job {} has no video artifact, using first output {}",
                        handle, artifact.url
                    );
                }
                Ok(artifact.clone())
            }
            None => Err(GenerationError::NoArtifacts {
                job_id: handle.to_string(),
            }),
        }
    }

    /// Download `artifact` to a fresh file in the output directory.
    pub async fn download(
        &self,
        artifact: &Artifact,
        request: &JobRequest,
    ) -> Result<(PathBuf, u64), GenerationError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let path = self.output_dir.join(self.artifact_filename(request));
        let bytes = match self.provider.download(&artifact.url, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    debug!(
                        "Could not remove partial artifact {}: {}",
                        path.display(),
                        remove_err
                    );
                }
                return Err(e.into());
            }
        };

        if bytes == 0 {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Could not remove empty artifact {}: {}", path.display(), e);
            }
            return Err(GenerationError::EmptyDownload { path });
        }

        info!("Downloaded {} ({} bytes)", path.display(), bytes);
        Ok((path, bytes))
    }

    /// Best-effort remote cancel. Never fails.
    pub async fn cancel(&self, handle: &JobHandle) {
        match self.provider.cancel(handle.as_str()).await {
            Ok(()) => {
                metrics::CANCELS.with_label_values(&["ok"]).inc();
                info!("Cancelled job {}", handle);
            }
            Err(e) => {
                metrics::CANCELS.with_label_values(&["failed"]).inc();
                warn!("Failed to cancel job {}: {}", handle, e);
            }
        }
    }

    /// Run one full attempt for the request at `index`.
    pub async fn run(
        &self,
        index: usize,
        request: &JobRequest,
    ) -> Result<JobResult, AttemptFailure> {
        let started = Instant::now();

        let handle = self
            .submit(request)
            .await
            .map_err(AttemptFailure::before_submit)?;
        info!(
            "Submitted job {} for request {} (scene {:?})",
            handle, index, request.scene_id
        );

        let mut attempt = JobAttempt::new(handle);

        if let Err(e) = self.poll(&mut attempt).await {
            return Err(AttemptFailure::after_submit(&attempt, e));
        }

        let artifact = match self.fetch_output(&attempt.handle).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(AttemptFailure::after_submit(&attempt, e)),
        };

        let (video_path, file_size) = match self.download(&artifact, request).await {
            Ok(downloaded) => downloaded,
            Err(e) => return Err(AttemptFailure::after_submit(&attempt, e)),
        };

        Ok(JobResult {
            index,
            video_path,
            width: request.width,
            height: request.height,
            fps: request.fps,
            duration_secs: request.duration_secs,
            file_size,
            provider: self.provider.name().to_string(),
            workflow_id: self.workflow_id.clone(),
            job_id: attempt.handle.to_string(),
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn artifact_filename(&self, request: &JobRequest) -> String {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let scene = if request.scene_id.trim().is_empty() {
            &unique[..8]
        } else {
            request.scene_id.as_str()
        };
        format!("{}_{}_{}.mp4", self.file_prefix, sanitize(scene), unique)
    }
}

/// Keep filename components to a safe character set.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
