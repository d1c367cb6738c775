//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{ListenerBlueprint, SinkType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    server_url: String,
    start_time: String,
    max_concurrent_builds: usize,
    build_timeout_secs: Option<u64>,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    server_url: blueprint.server.url.clone(),
                    start_time: blueprint.server.start_time.clone(),
                    max_concurrent_builds: blueprint.processing.max_concurrent_builds,
                    build_timeout_secs: blueprint.processing.build_timeout_secs,
                    sink_count: blueprint.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ListenerBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - records are only shown in the summary".to_string());
    } else if blueprint
        .sinks
        .iter()
        .all(|sink| sink.sink_type == SinkType::Log)
    {
        warnings.push("Only log sinks configured - records are not persisted".to_string());
    }

    if blueprint.processing.build_timeout_secs.is_none() {
        warnings.push(
            "processing.build_timeout_secs is unset - a stalled build stream holds its slot"
                .to_string(),
        );
    }

    if blueprint.server.with_credentials && blueprint.server.access_token.is_none() {
        warnings.push("server.with_credentials is set but no access_token is configured".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Server: {}", summary.server_url);
            println!("  Start time: {}", summary.start_time);
            println!("  Max concurrent builds: {}", summary.max_concurrent_builds);
            match summary.build_timeout_secs {
                Some(secs) => println!("  Build timeout: {}s", secs),
                None => println!("  Build timeout: none"),
            }
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
