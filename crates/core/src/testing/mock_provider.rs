//! Mock video provider for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::provider::{Artifact, NodeField, ProviderError, RemoteStatus, VideoProvider};

/// Bytes written by a download unless a script says otherwise.
pub const DEFAULT_PAYLOAD: &[u8] = b"\x00\x00\x00\x18ftypmp42mock-video";

/// A recorded create_job call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    /// Script key (the image prompt) the call was matched against.
    pub key: String,
    pub workflow_id: String,
    pub fields: Vec<NodeField>,
    /// Assigned job id, `None` if the call was scripted to fail.
    pub job_id: Option<String>,
    /// When the call was made.
    pub timestamp: chrono::DateTime<Utc>,
    /// Tokio clock reading, usable under paused time.
    pub at: tokio::time::Instant,
}

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Fail(Option<String>),
    NeverFinish,
}

/// Scripted behavior for one attempt at a request.
#[derive(Debug)]
pub struct ScriptedAttempt {
    submit_error: Option<ProviderError>,
    status_errors: usize,
    pending_polls: usize,
    outcome: Outcome,
    artifacts: Option<Vec<Artifact>>,
    payload: Vec<u8>,
    interrupt_download: bool,
}

impl ScriptedAttempt {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            submit_error: None,
            status_errors: 0,
            pending_polls: 0,
            outcome,
            artifacts: None,
            payload: DEFAULT_PAYLOAD.to_vec(),
            interrupt_download: false,
        }
    }

    /// Job finishes on the first poll with one mp4 artifact.
    pub fn succeed() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    /// Job is reported failed by the provider.
    pub fn task_failure(reason: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Fail(Some(reason.into())))
    }

    /// Job stays running forever.
    pub fn never_finishes() -> Self {
        Self::with_outcome(Outcome::NeverFinish)
    }

    /// Submission fails with `error`.
    pub fn submit_error(error: ProviderError) -> Self {
        Self {
            submit_error: Some(error),
            ..Self::succeed()
        }
    }

    /// Submission is refused because the provider queue is full.
    pub fn queue_full() -> Self {
        Self::submit_error(ProviderError::QueueFull("TASK_QUEUE_MAXED".to_string()))
    }

    /// Report running for `polls` status calls before the outcome.
    pub fn with_pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Fail the first `errors` status calls with a connection error.
    pub fn with_status_errors(mut self, errors: usize) -> Self {
        self.status_errors = errors;
        self
    }

    /// Write part of the payload, then fail the download.
    pub fn with_interrupted_download(mut self) -> Self {
        self.interrupt_download = true;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug)]
struct MockJob {
    status_errors: usize,
    pending_polls: usize,
    outcome: Outcome,
    artifacts: Vec<Artifact>,
    status_calls: usize,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<ScriptedAttempt>>,
    jobs: HashMap<String, MockJob>,
    payloads: HashMap<String, Vec<u8>>,
    interrupted: HashSet<String>,
    submissions: Vec<RecordedSubmission>,
    cancelled: Vec<String>,
    next_id: u64,
    fail_cancels: bool,
}

/// Mock implementation of the VideoProvider trait.
///
/// Attempts are scripted per request, keyed by the image prompt (the first
/// `text` field of the submission). Requests without a script, or whose
/// script has run out, succeed immediately.
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockVideoProvider::new();
/// provider
///     .script("scene-2", vec![
///         ScriptedAttempt::submit_error(ProviderError::Timeout),
///         ScriptedAttempt::succeed().with_pending_polls(3),
///     ])
///     .await;
///
/// // ... run a batch ...
///
/// assert_eq!(provider.submissions_for("scene-2").await.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MockVideoProvider {
    state: Arc<RwLock<MockState>>,
}

impl MockVideoProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripted attempts for requests whose image prompt is `key`.
    pub async fn script(&self, key: &str, attempts: Vec<ScriptedAttempt>) {
        self.state
            .write()
            .await
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(attempts);
    }

    /// Make every cancel call fail.
    pub async fn fail_cancels(&self, fail: bool) {
        self.state.write().await.fail_cancels = fail;
    }

    /// Get all recorded create_job calls.
    pub async fn submissions(&self) -> Vec<RecordedSubmission> {
        self.state.read().await.submissions.clone()
    }

    /// Recorded create_job calls for one script key.
    pub async fn submissions_for(&self, key: &str) -> Vec<RecordedSubmission> {
        self.state
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| s.key == key)
            .cloned()
            .collect()
    }

    /// Job ids that received a cancel call, in call order.
    pub async fn cancelled(&self) -> Vec<String> {
        self.state.read().await.cancelled.clone()
    }

    /// Number of status calls made for `job_id`.
    pub async fn status_calls(&self, job_id: &str) -> usize {
        self.state
            .read()
            .await
            .jobs
            .get(job_id)
            .map(|j| j.status_calls)
            .unwrap_or(0)
    }

    fn script_key(fields: &[NodeField]) -> String {
        fields
            .iter()
            .find(|f| f.field_name == "text")
            .and_then(|f| f.field_value.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl VideoProvider for MockVideoProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_job(
        &self,
        workflow_id: &str,
        fields: &[NodeField],
    ) -> Result<String, ProviderError> {
        let key = Self::script_key(fields);

        let scripted = self
            .state
            .write()
            .await
            .scripts
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(ScriptedAttempt::succeed);

        let mut state = self.state.write().await;
        let mut record = RecordedSubmission {
            key,
            workflow_id: workflow_id.to_string(),
            fields: fields.to_vec(),
            job_id: None,
            timestamp: Utc::now(),
            at: tokio::time::Instant::now(),
        };

        if let Some(err) = scripted.submit_error {
            state.submissions.push(record);
            return Err(err);
        }

        state.next_id += 1;
        let job_id = format!("{}", 1_000_000 + state.next_id);
        record.job_id = Some(job_id.clone());
        state.submissions.push(record);

        let artifacts = scripted
            .artifacts
            .unwrap_or_else(|| vec![Artifact::new(format!("https://mock.cdn/{}.mp4", job_id))]);
        for artifact in &artifacts {
            state
                .payloads
                .insert(artifact.url.clone(), scripted.payload.clone());
            if scripted.interrupt_download {
                state.interrupted.insert(artifact.url.clone());
            }
        }

        state.jobs.insert(
            job_id.clone(),
            MockJob {
                status_errors: scripted.status_errors,
                pending_polls: scripted.pending_polls,
                outcome: scripted.outcome,
                artifacts,
                status_calls: 0,
            },
        );

        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<RemoteStatus, ProviderError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ProviderError::ApiError(format!("unknown task {}", job_id)))?;

        job.status_calls += 1;

        if job.status_errors > 0 {
            job.status_errors -= 1;
            return Err(ProviderError::ConnectionFailed("connection reset".to_string()));
        }
        if job.pending_polls > 0 {
            job.pending_polls -= 1;
            return Ok(RemoteStatus::Running);
        }

        Ok(match &job.outcome {
            Outcome::Succeed => RemoteStatus::Succeeded,
            Outcome::Fail(reason) => RemoteStatus::Failed {
                reason: reason.clone(),
            },
            Outcome::NeverFinish => RemoteStatus::Running,
        })
    }

    async fn outputs(&self, job_id: &str) -> Result<Vec<Artifact>, ProviderError> {
        self.state
            .read()
            .await
            .jobs
            .get(job_id)
            .map(|j| j.artifacts.clone())
            .ok_or_else(|| ProviderError::ApiError(format!("unknown task {}", job_id)))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.write().await;
        state.cancelled.push(job_id.to_string());
        if state.fail_cancels {
            return Err(ProviderError::ApiError("cancel rejected".to_string()));
        }
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProviderError> {
        let (payload, interrupted) = {
            let state = self.state.read().await;
            let payload = state
                .payloads
                .get(url)
                .cloned()
                .unwrap_or_else(|| DEFAULT_PAYLOAD.to_vec());
            (payload, state.interrupted.contains(url))
        };

        if interrupted {
            let half = &payload[..payload.len() / 2];
            tokio::fs::write(dest, half).await?;
            return Err(ProviderError::DownloadFailed(format!(
                "stream from {} ended after {} bytes",
                url,
                half.len()
            )));
        }

        tokio::fs::write(dest, &payload).await?;
        Ok(payload.len() as u64)
    }
}
