//! `listen` command implementation.

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::ListenerBlueprint;
use tracing::{info, warn};

use super::shutdown_signal;
use crate::cli::ListenArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `listen` command
pub async fn run_listen(args: &ListenArgs) -> Result<()> {
    let blueprint = resolve_blueprint(args)?;

    info!(
        server = %blueprint.server.url,
        start_time = %blueprint.server.start_time,
        max_concurrent = blueprint.processing.max_concurrent_builds,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    let mut config = PipelineConfig::from_blueprint(&blueprint);
    config.apply_args(&args.processing);
    config.validate()?;

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, &config);
        return Ok(());
    }

    let pipeline = Pipeline::new(config).start().await?;
    pipeline
        .processor()
        .start(blueprint.server.url.as_str(), blueprint.server.start_time.as_str())
        .context("Failed to start listening")?;

    info!("Listening for builds, press Ctrl+C to stop");
    shutdown_signal().await;
    warn!("Received shutdown signal, stopping listener...");

    let stats = pipeline.finish().await?;
    info!(
        builds_completed = stats.builds_completed,
        records = stats.record_stats.total_records,
        duration_secs = stats.duration.as_secs_f64(),
        "Listener finished"
    );
    stats.print_summary();

    Ok(())
}

/// Configuration file first, then `--server` / `--since` on top
fn resolve_blueprint(args: &ListenArgs) -> Result<ListenerBlueprint> {
    let mut blueprint = match (&args.processing.config, &args.server) {
        (Some(path), _) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            info!(config = %path.display(), "Loading configuration");
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        (None, Some(server)) => ListenerBlueprint::for_server(server.as_str()),
        (None, None) => return Err(CliError::MissingServer.into()),
    };

    if let Some(server) = &args.server {
        info!(server = %server, "Overriding server URL from CLI");
        blueprint.server.url = server.clone();
    }
    if let Some(since) = &args.since {
        blueprint.server.start_time = since.clone();
    }

    ConfigLoader::validate(&blueprint)
        .map_err(|e| CliError::config_validation(e.to_string()))?;
    Ok(blueprint)
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ListenerBlueprint, config: &PipelineConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Server:");
    println!("  URL: {}", blueprint.server.url);
    println!("  Start time: {}", blueprint.server.start_time);
    println!("  Credentials: {}", config.processor.with_credentials);

    println!("\nProcessing:");
    println!(
        "  Max concurrent builds: {}",
        config.processor.max_concurrent_builds
    );
    match config.processor.build_timeout {
        Some(timeout) => println!("  Build timeout: {}s", timeout.as_secs()),
        None => println!("  Build timeout: none"),
    }

    if !config.sinks.is_empty() {
        println!("\nSinks ({}):", config.sinks.len());
        for sink in &config.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
