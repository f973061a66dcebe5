//! Timbertrace CLI
//!
//! Offline tools for operators of the Timbertrace telemetry pipeline.
//!
//! # Usage
//!
//! ```bash
//! timbertrace --help
//! timbertrace check-config timbertrace.json
//! timbertrace fingerprint --type ExportError --message "Export of 4711 failed" --frame billing::export
//! timbertrace verify-chain audit-export.json
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::audit::{verify_entries, VerificationReport};
use shared::config::{FingerprintConfig, TelemetryConfig};
use shared::grouping::Fingerprinter;
use shared::models::{AuditEntry, StackFrame, GENESIS_CHECKSUM};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timbertrace CLI - telemetry pipeline tools
#[derive(Parser)]
#[command(name = "timbertrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline configuration file
    CheckConfig {
        /// Path to the JSON configuration
        path: PathBuf,
    },
    /// Compute the fingerprint an error would be grouped under
    Fingerprint {
        /// Error type
        #[arg(long = "type")]
        error_type: String,
        /// Error message
        #[arg(long)]
        message: String,
        /// Stack frame, innermost first, as `module::function` or `function`
        #[arg(long = "frame")]
        frames: Vec<String>,
        /// Pipeline configuration providing the normalization rules
        #[arg(long, env = "TIMBERTRACE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Verify an exported audit chain (a JSON array of entries)
    VerifyChain {
        /// Path to the export
        path: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct FingerprintOutput {
    fingerprint: String,
    normalized_message: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::CheckConfig { path }) => {
            let config = TelemetryConfig::load(&path)
                .with_context(|| format!("Invalid configuration {}", path.display()))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{} is valid", path.display());
                println!("  metric policies:  {}", config.aggregation.policies.len());
                println!("  alerts:           {}", config.alerting.definitions.len());
                println!("  audit chains:     {}", config.audit.chain_scope);
                println!("  session timeout:  {}s", config.sessions.idle_timeout_secs);
                println!(
                    "  event retention:  {} days",
                    config.retention.events.ttl_days
                );
            }
        }
        Some(Commands::Fingerprint {
            error_type,
            message,
            frames,
            config,
        }) => {
            let fingerprint_config = match config {
                Some(path) => TelemetryConfig::load(&path)?.fingerprint,
                None => FingerprintConfig::default(),
            };
            let output = fingerprint(&fingerprint_config, &error_type, &message, &frames)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", output.fingerprint);
                println!("normalized: {}", output.normalized_message);
            }
        }
        Some(Commands::VerifyChain { path }) => {
            let reports = verify_export(&path)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    match report.first_invalid {
                        None => println!("{}: {} entries verified", report.chain, report.checked),
                        Some(seq) => println!(
                            "{}: TAMPERED at sequence {seq} (invalid: {:?})",
                            report.chain, report.invalid_sequences
                        ),
                    }
                }
            }
            if reports.iter().any(|r| !r.is_valid()) {
                bail!("audit chain verification failed");
            }
        }
        None => {
            println!("Timbertrace CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn parse_frame(raw: &str) -> StackFrame {
    match raw.rsplit_once("::") {
        Some((module, function)) if !module.is_empty() => {
            StackFrame::new(function).with_module(module)
        }
        _ => StackFrame::new(raw),
    }
}

fn fingerprint(
    config: &FingerprintConfig,
    error_type: &str,
    message: &str,
    frames: &[String],
) -> Result<FingerprintOutput> {
    let fingerprinter = Fingerprinter::new(config).map_err(anyhow::Error::msg)?;
    let stack: Vec<StackFrame> = frames.iter().map(String::as_str).map(parse_frame).collect();
    let (fingerprint, normalized_message) = fingerprinter.compute(error_type, message, &stack);
    Ok(FingerprintOutput {
        fingerprint,
        normalized_message,
    })
}

/// Verifies every chain in an export. A chain that does not start at
/// genesis is anchored on its first entry's `prev_checksum`.
fn verify_entries_by_chain(entries: Vec<AuditEntry>) -> Result<Vec<VerificationReport>> {
    let mut chains: BTreeMap<String, Vec<AuditEntry>> = BTreeMap::new();
    for entry in entries {
        chains.entry(entry.chain.clone()).or_default().push(entry);
    }

    let mut reports = Vec::with_capacity(chains.len());
    for (chain, mut entries) in chains {
        entries.sort_by_key(|e| e.sequence);
        let Some(first) = entries.first() else {
            continue;
        };
        let start = first.sequence;
        let anchor = if start == 0 {
            GENESIS_CHECKSUM.to_string()
        } else {
            first.prev_checksum.clone()
        };
        debug!(chain = %chain, start, entries = entries.len(), "Verifying chain");
        reports.push(verify_entries(&chain, start, &entries, &anchor)?);
    }
    Ok(reports)
}

fn verify_export(path: &Path) -> Result<Vec<VerificationReport>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: Vec<AuditEntry> = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a JSON array of audit entries", path.display()))?;
    verify_entries_by_chain(entries)
}
