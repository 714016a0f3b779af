mod commands;
mod input;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stressgate_core::telemetry;
use stressgate_core::EngineConfig;

use crate::commands::{
    calibrate::CalibrateArgs, catalog::CatalogArgs, gate::GateArgs, sensitivity::SensitivityArgs,
    stress::StressArgs,
};

#[derive(Parser)]
#[command(name = "stressgate")]
#[command(author, version, about = "Stress testing, capital calibration and trade gating", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: CliCommand,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List the configured stress scenarios
    Catalog(CatalogArgs),

    /// Run every configured scenario against a portfolio
    Stress(StressArgs),

    /// Calibrate capital allocation across strategies
    Calibrate(CalibrateArgs),

    /// Replay trade proposals through the circuit breaker gate
    Gate(GateArgs),

    /// Sweep one portfolio parameter and report how the risk score moves
    Sensitivity(SensitivityArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    telemetry::init_tracing(if cli.verbose { "debug" } else { "info" });
    telemetry::describe_metrics();

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        CliCommand::Catalog(args) => commands::catalog::run(&config, args),
        CliCommand::Stress(args) => commands::stress::run(config, args).await,
        CliCommand::Calibrate(args) => commands::calibrate::run(&config, args).await,
        CliCommand::Gate(args) => commands::gate::run(&config, args).await,
        CliCommand::Sensitivity(args) => commands::sensitivity::run(config, args).await,
    }
}
