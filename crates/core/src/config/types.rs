use serde::{Deserialize, Serialize};

use crate::generation::GenerationConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Remote generation provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider API key
    pub api_key: String,
    /// Provider base URL (e.g., "https://www.runninghub.cn")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Workflow to run for text-to-video jobs
    #[serde(default = "default_workflow_id")]
    pub workflow_id: String,
    /// TCP connect timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
    /// Per-request timeout in seconds for API calls (default: 60)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u32,
    /// Timeout in seconds for a whole artifact download (default: 300)
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u32,
}

fn default_base_url() -> String {
    "https://www.runninghub.cn".to_string()
}

fn default_workflow_id() -> String {
    "1964265917020520450".to_string()
}

fn default_connect_timeout() -> u32 {
    30
}

fn default_request_timeout() -> u32 {
    60
}

fn default_download_timeout() -> u32 {
    300
}

/// Node layout of the text-to-video workflow.
///
/// Each id names the workflow node whose field is overridden on submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_image_prompt_node")]
    pub image_prompt_node: String,
    #[serde(default = "default_video_prompt_node")]
    pub video_prompt_node: String,
    #[serde(default = "default_negative_prompt_node")]
    pub negative_prompt_node: String,
    #[serde(default = "default_resolution_node")]
    pub resolution_node: String,
    #[serde(default = "default_seed_node")]
    pub seed_node: String,
    /// Node receiving the frame count as its `length` field.
    /// Workflows with a fixed clip length leave this unset.
    #[serde(default)]
    pub frames_node: Option<String>,
    /// Negative prompt used when a request does not carry one.
    #[serde(default = "default_negative_prompt")]
    pub default_negative_prompt: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            image_prompt_node: default_image_prompt_node(),
            video_prompt_node: default_video_prompt_node(),
            negative_prompt_node: default_negative_prompt_node(),
            resolution_node: default_resolution_node(),
            seed_node: default_seed_node(),
            frames_node: None,
            default_negative_prompt: default_negative_prompt(),
        }
    }
}

fn default_image_prompt_node() -> String {
    "38".to_string()
}

fn default_video_prompt_node() -> String {
    "10".to_string()
}

fn default_negative_prompt_node() -> String {
    "1".to_string()
}

fn default_resolution_node() -> String {
    "39".to_string()
}

fn default_seed_node() -> String {
    "36".to_string()
}

fn default_negative_prompt() -> String {
    "oversaturated, overexposed, static, blurry details, subtitles, grey overall tone, \
     worst quality, low quality, jpeg artifacts, ugly, mutilated, extra fingers, badly drawn \
     hands, badly drawn face, deformed, disfigured, malformed limbs, fused fingers, \
     motionless frame, cluttered background, three legs, crowded background, walking backwards"
        .to_string()
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub provider: SanitizedProviderConfig,
    pub workflow: WorkflowConfig,
    pub generation: GenerationConfig,
}

/// Sanitized provider config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub base_url: String,
    pub workflow_id: String,
    pub api_key_configured: bool,
    pub connect_timeout_secs: u32,
    pub request_timeout_secs: u32,
    pub download_timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            provider: SanitizedProviderConfig {
                base_url: config.provider.base_url.clone(),
                workflow_id: config.provider.workflow_id.clone(),
                api_key_configured: !config.provider.api_key.is_empty(),
                connect_timeout_secs: config.provider.connect_timeout_secs,
                request_timeout_secs: config.provider.request_timeout_secs,
                download_timeout_secs: config.provider.download_timeout_secs,
            },
            workflow: config.workflow.clone(),
            generation: config.generation.clone(),
        }
    }
}
