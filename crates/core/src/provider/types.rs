//! Types for video provider operations.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while talking to a video provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    /// The provider refused the job because its pending queue is at capacity.
    #[error("provider queue is full: {0}")]
    QueueFull(String),

    #[error("server API error: {0}")]
    ApiError(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether the provider rejected work for lack of capacity.
    pub fn is_capacity_rejection(&self) -> bool {
        matches!(self, ProviderError::QueueFull(_))
    }
}

/// Remote status of a job as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Accepted and waiting in the provider queue.
    Pending,
    /// Picked up by a worker.
    Running,
    /// Post-processing outputs.
    Processing,
    /// Finished; outputs are available.
    Succeeded,
    /// The provider gave up on the job.
    Failed { reason: Option<String> },
    /// A status string this client does not recognise.
    Unknown(String),
}

impl RemoteStatus {
    /// Whether the provider is still working on the job.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Pending | RemoteStatus::Running | RemoteStatus::Processing
        )
    }
}

/// A single field override sent with a workflow submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeField {
    /// Workflow node identifier.
    pub node_id: String,
    /// Field on that node.
    pub field_name: String,
    /// Value to set.
    pub field_value: serde_json::Value,
}

impl NodeField {
    pub fn new(
        node_id: impl Into<String>,
        field_name: impl Into<String>,
        field_value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

/// An output file produced by a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Download URL.
    pub url: String,
    /// File type hint from the provider, when given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl Artifact {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_type: None,
        }
    }
}

/// Remote compute API that runs generation workflows.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Returns the name of this provider implementation.
    fn name(&self) -> &str;

    /// Submits a workflow run and returns the provider-assigned job id.
    async fn create_job(
        &self,
        workflow_id: &str,
        fields: &[NodeField],
    ) -> Result<String, ProviderError>;

    /// Queries the current status of a job.
    async fn status(&self, job_id: &str) -> Result<RemoteStatus, ProviderError>;

    /// Lists the output artifacts of a finished job.
    async fn outputs(&self, job_id: &str) -> Result<Vec<Artifact>, ProviderError>;

    /// Asks the provider to stop a job.
    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError>;

    /// Streams an artifact to `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProviderError>;
}
