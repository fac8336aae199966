//! RunningHub workflow API client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

use super::{Artifact, NodeField, ProviderError, RemoteStatus, VideoProvider};

/// Envelope code the API uses when the account's task queue is full.
const QUEUE_FULL_CODE: i64 = 421;
const QUEUE_FULL_MARKER: &str = "TASK_QUEUE_MAXED";

/// RunningHub client implementation.
pub struct RunningHubProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    api_key: &'a str,
    workflow_id: &'a str,
    node_info_list: &'a [NodeField],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    task_id: Value,
    #[serde(default)]
    task_status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest<'a> {
    api_key: &'a str,
    task_id: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputItem {
    file_url: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
}

impl RunningHubProvider {
    /// Create a new RunningHub client.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs as u64))
            .timeout(Duration::from_secs(config.request_timeout_secs as u64))
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(format!("HTTP client setup: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// POST `body` to an openapi endpoint and unwrap the response envelope.
    async fn call<B, T>(&self, endpoint: &str, body: &B) -> Result<Option<T>, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let envelope = self.post_envelope(endpoint, body).await?;
        unwrap_envelope(endpoint, envelope)
    }

    async fn post_envelope<B, T>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Envelope<T>, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/task/openapi/{}", self.base_url(), endpoint);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!(
                "{} returned HTTP {}: {}",
                endpoint, status, body
            )));
        }

        response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("{} response: {}", endpoint, e))
        })
    }

    /// Ask the outputs endpoint why a task failed. `None` if it does not say.
    async fn failure_reason(&self, job_id: &str) -> Option<String> {
        let request = TaskRequest {
            api_key: &self.config.api_key,
            task_id: task_id_value(job_id),
        };

        match self.post_envelope::<_, Value>("outputs", &request).await {
            Ok(envelope) => describe_failure(&envelope),
            Err(e) => {
                debug!("Could not fetch failure reason for task {}: {}", job_id, e);
                None
            }
        }
    }
}

/// Map reqwest errors onto provider errors.
fn map_request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() {
        ProviderError::ConnectionFailed(e.to_string())
    } else {
        ProviderError::ApiError(e.to_string())
    }
}

fn unwrap_envelope<T>(endpoint: &str, envelope: Envelope<T>) -> Result<Option<T>, ProviderError> {
    if envelope.code == 0 {
        return Ok(envelope.data);
    }

    let msg = envelope.msg.unwrap_or_default();
    if envelope.code == QUEUE_FULL_CODE || msg.contains(QUEUE_FULL_MARKER) {
        return Err(ProviderError::QueueFull(if msg.is_empty() {
            QUEUE_FULL_MARKER.to_string()
        } else {
            msg
        }));
    }

    Err(ProviderError::ApiError(format!(
        "{} rejected with code {}: {}",
        endpoint, envelope.code, msg
    )))
}

/// Map the API's status string onto [`RemoteStatus`].
fn parse_status(raw: &str) -> RemoteStatus {
    match raw.to_ascii_uppercase().as_str() {
        "QUEUED" | "PENDING" => RemoteStatus::Pending,
        "RUNNING" => RemoteStatus::Running,
        "PROCESSING" => RemoteStatus::Processing,
        "SUCCESS" => RemoteStatus::Succeeded,
        "FAILED" => RemoteStatus::Failed { reason: None },
        _ => RemoteStatus::Unknown(raw.to_string()),
    }
}

/// Diagnostic carried by the outputs envelope of a failed task.
///
/// Prefers `data.failedReason` (node name and exception message), then the
/// envelope message of a rejected call.
fn describe_failure(envelope: &Envelope<Value>) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(reason) = envelope.data.as_ref().and_then(|d| d.get("failedReason")) {
        if let Some(text) = non_empty(Some(reason)) {
            return Some(text);
        }
        let message = non_empty(reason.get("exception_message"));
        match (non_empty(reason.get("node_name")), message) {
            (Some(node), Some(message)) => return Some(format!("{}: {}", node, message)),
            (None, Some(message)) => return Some(message),
            _ => {}
        }
    }

    if envelope.code == 0 {
        return None;
    }
    envelope
        .msg
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// The API takes numeric task ids; pass anything else through as a string.
fn task_id_value(job_id: &str) -> Value {
    job_id
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(job_id))
}

fn task_id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl VideoProvider for RunningHubProvider {
    fn name(&self) -> &str {
        "runninghub"
    }

    async fn create_job(
        &self,
        workflow_id: &str,
        fields: &[NodeField],
    ) -> Result<String, ProviderError> {
        let request = CreateRequest {
            api_key: &self.config.api_key,
            workflow_id,
            node_info_list: fields,
        };

        let data: CreateData = self
            .call("create", &request)
            .await?
            .ok_or_else(|| ProviderError::InvalidResponse("create: missing data".to_string()))?;

        let job_id = task_id_string(&data.task_id)
            .ok_or_else(|| ProviderError::InvalidResponse("create: missing taskId".to_string()))?;

        debug!(
            "RunningHub accepted task {} (status {:?})",
            job_id, data.task_status
        );
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<RemoteStatus, ProviderError> {
        let request = TaskRequest {
            api_key: &self.config.api_key,
            task_id: task_id_value(job_id),
        };

        let data: Option<String> = self.call("status", &request).await?;
        let status = match data {
            Some(raw) => parse_status(&raw),
            None => {
                return Err(ProviderError::InvalidResponse(
                    "status: missing data".to_string(),
                ));
            }
        };

        match status {
            RemoteStatus::Failed { reason: None } => Ok(RemoteStatus::Failed {
                reason: self.failure_reason(job_id).await,
            }),
            other => Ok(other),
        }
    }

    async fn outputs(&self, job_id: &str) -> Result<Vec<Artifact>, ProviderError> {
        let request = TaskRequest {
            api_key: &self.config.api_key,
            task_id: task_id_value(job_id),
        };

        let items: Vec<OutputItem> = self.call("outputs", &request).await?.unwrap_or_default();

        Ok(items
            .into_iter()
            .filter_map(|item| {
                item.file_url.map(|url| Artifact {
                    url,
                    file_type: item.file_type,
                })
            })
            .collect())
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        let request = TaskRequest {
            api_key: &self.config.api_key,
            task_id: task_id_value(job_id),
        };

        let _: Option<Value> = self.call("cancel", &request).await?;
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.download_timeout_secs as u64))
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::DownloadFailed(format!("HTTP {} for {}", status, url)));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::DownloadFailed(e.to_string())
                }
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            warn!("Download of {} produced no bytes", url);
        }
        Ok(written)
    }
}
