//! # fwa CLI entry point
//!
//! Parses arguments, loads configuration, wires the services and
//! dispatches to the subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fwa_cli::analyze::{run_analyze, AnalyzeArgs};
use fwa_cli::context::Services;
use fwa_cli::reconcile::{run_reconcile, ReconcileArgs};
use fwa_cli::store::{run_store, StoreArgs};
use fwa_core::FwaConfig;

/// Firmware attestation analysis.
///
/// Stores firmware images by content, resolves them by blob, content id or
/// version name, and runs analyzers over them.
#[derive(Parser, Debug)]
#[command(name = "fwa", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    /// Ignored when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an analyze job.
    Analyze(AnalyzeArgs),

    /// Store, fetch and look up firmware images.
    Store(StoreArgs),

    /// Repair images whose upload never completed.
    Reconcile(ReconcileArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    // Logs go to stderr; stdout carries command output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FwaConfig> {
    let config = match path {
        Some(path) => FwaConfig::load(path)?,
        None => FwaConfig::from_env()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_ref())?;
    let services = Services::connect(config).await?;
    let result = match &cli.command {
        Commands::Analyze(args) => run_analyze(args, &services).await,
        Commands::Store(args) => run_store(args, &services).await,
        Commands::Reconcile(args) => run_reconcile(args, &services).await,
    };
    services.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    tracing::debug!("fwa CLI starting");

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
