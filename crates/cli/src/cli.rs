//! Command-line interface definitions.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use reelsmith_core::JobRequest;

/// Default configuration file.
pub const DEFAULT_CONFIG: &str = "config.toml";

/// Batch text-to-video generation against a remote workflow API.
#[derive(Parser, Debug)]
#[command(name = "reelsmith")]
#[command(about = "Generate short video clips from text prompts on a remote workflow API")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file.
    #[arg(short, long, env = "REELSMITH_CONFIG", default_value = DEFAULT_CONFIG, global = true)]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset (e.g. "info", "reelsmith_core=debug").
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Generate every request in a JSON file.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Load and validate the configuration, then print it without secrets.
    CheckConfig,
}

/// Arguments for `reelsmith generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// JSON file holding an array of requests, or `{"requests": [...]}`.
    #[arg(short, long)]
    pub requests: PathBuf,

    /// Concurrency hint, clamped to the configured maximum.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Override the configured output directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print Prometheus metrics after the batch.
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestsFile {
    List(Vec<JobRequest>),
    Wrapped { requests: Vec<JobRequest> },
}

/// Read requests from `path`.
pub fn read_requests(path: &Path) -> Result<Vec<JobRequest>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read requests from {:?}", path))?;
    parse_requests(&raw).with_context(|| format!("Invalid requests file {:?}", path))
}

fn parse_requests(raw: &str) -> Result<Vec<JobRequest>> {
    let requests = match serde_json::from_str::<RequestsFile>(raw)? {
        RequestsFile::List(requests) => requests,
        RequestsFile::Wrapped { requests } => requests,
    };

    if let Some(index) = requests
        .iter()
        .position(|r| r.image_prompt.trim().is_empty())
    {
        bail!("request {} has an empty image_prompt", index);
    }

    Ok(requests)
}
