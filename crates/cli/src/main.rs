mod cli;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelsmith_core::{
    load_config, validate_config, BatchOrchestrator, ConcurrencyRegistry, Config,
    RunningHubProvider, SanitizedConfig, VideoProvider,
};

use cli::{Cli, Commands, GenerateArgs};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.as_str().into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("reelsmith {}", VERSION);

    // Load configuration
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;
    info!("Configuration loaded successfully");

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Generate(args) => generate(config, args).await,
    }
}

fn check_config(config: &Config) -> Result<()> {
    let sanitized = SanitizedConfig::from(config);
    println!("{}", serde_json::to_string_pretty(&sanitized)?);
    Ok(())
}

async fn generate(mut config: Config, args: GenerateArgs) -> Result<()> {
    if let Some(output_dir) = args.output_dir {
        config.generation.output_dir = output_dir;
    }

    let requests = cli::read_requests(&args.requests)?;
    info!(
        "Loaded {} requests from {:?}",
        requests.len(),
        args.requests
    );

    let provider: Arc<dyn VideoProvider> = Arc::new(
        RunningHubProvider::new(config.provider.clone())
            .context("Failed to create provider client")?,
    );
    info!(
        "Using provider {} at {} (workflow {})",
        provider.name(),
        config.provider.base_url,
        config.provider.workflow_id
    );
    info!(
        "Output directory: {:?}, max concurrency: {}, max retries: {}",
        config.generation.output_dir,
        config.generation.max_concurrency,
        config.generation.max_retries
    );

    let orchestrator =
        BatchOrchestrator::from_config(provider, &config, ConcurrencyRegistry::global());
    let max_concurrency = orchestrator.config().max_concurrency;
    let concurrency = args.concurrency.unwrap_or(max_concurrency);
    if concurrency > max_concurrency {
        warn!(
            "Requested concurrency {} exceeds configured maximum {}, clamping",
            concurrency, max_concurrency
        );
    }

    let outcome = orchestrator.generate_batch(&requests, concurrency).await;

    if args.metrics {
        print!("{}", metrics::render()?);
    }

    let batch = outcome.context("Batch generation failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "summary": batch.summary(),
            "results": batch.slots(),
        }))?
    );

    Ok(())
}
