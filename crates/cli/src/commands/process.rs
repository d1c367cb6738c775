//! `process` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::AggregateRecord;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::shutdown_signal;
use crate::cli::ProcessArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `process` command
pub async fn run_process(args: &ProcessArgs) -> Result<()> {
    let (source_name, text) = read_input(args.file.as_deref()).await?;

    let builds = dispatcher::extract_scan_urls(&text);
    if builds.is_empty() {
        return Err(CliError::no_build_scans(source_name).into());
    }
    info!(builds = builds.len(), source = %source_name, "Found build scan links");

    let mut config = match &args.processing.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            let blueprint = ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            PipelineConfig::from_blueprint(&blueprint)
        }
        None => PipelineConfig::default(),
    };
    config.apply_args(&args.processing);
    config.validate()?;

    let pipeline = Pipeline::new(config).start().await?;
    for build in builds {
        pipeline.processor().submit_direct(build)?;
    }

    tokio::select! {
        result = pipeline.processor().wait_idle() => {
            result.context("Build processor stopped unexpectedly")?;
            info!("All builds processed");
        }
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, abandoning remaining builds...");
        }
    }

    let records = pipeline.records().clone();
    let stats = pipeline.finish().await?;

    // snapshot is newest first
    let mut ordered = records.snapshot();
    ordered.reverse();

    if args.json {
        for record in &ordered {
            let line = serde_json::to_string(record).context("Failed to serialize record")?;
            println!("{}", line);
        }
    } else {
        print_record_table(&ordered);
        stats.print_summary();
    }

    Ok(())
}

async fn read_input(file: Option<&Path>) -> Result<(String, String)> {
    match file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(CliError::from)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok((path.display().to_string(), text))
        }
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .map_err(CliError::from)
                .context("Failed to read stdin")?;
            Ok(("stdin".to_string(), text))
        }
    }
}

fn cell<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}

fn print_record_table(records: &[AggregateRecord]) {
    if records.is_empty() {
        println!("No records produced");
        return;
    }

    println!(
        "{:<16} {:<10} {:>6} {:<10} {:>10} {:>10} {:>8} {:>8} {:>8}  {}",
        "scenario", "phase", "number", "step", "exec ms", "tasks ms", "gc ms", "pack", "unpack",
        "build scan"
    );
    for record in records {
        println!(
            "{:<16} {:<10} {:>6} {:<10} {:>10} {:>10} {:>8} {:>8} {:>8}  {}",
            cell(&record.scenario),
            cell(&record.phase),
            cell(&record.number),
            cell(&record.step),
            cell(&record.execution_time),
            cell(&record.task_execution_time),
            cell(&record.gc_time),
            record.pack_time,
            record.unpack_time,
            record.build_scan,
        );
    }
}
