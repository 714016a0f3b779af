use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use comfy_table::{Cell, ContentArrangement, Table};
use stressgate_core::{
    CancellationHandle, EngineConfig, Portfolio, SensitivityParameter, StressTestOrchestrator,
};

use crate::input;
use crate::output::{impact_color, percent, print_structured, OutputFormat};

#[derive(Args)]
pub struct SensitivityArgs {
    /// Portfolio snapshot (JSON or YAML)
    #[arg(short, long)]
    portfolio: PathBuf,

    /// Parameter to sweep, e.g. total_value or daily_volume
    #[arg(long)]
    parameter: String,

    /// Lower end of the sweep
    #[arg(long)]
    min: f64,

    /// Upper end of the sweep
    #[arg(long)]
    max: f64,

    /// Number of points in the sweep
    #[arg(long, default_value = "5")]
    steps: usize,

    /// Monte Carlo trials per scenario
    #[arg(short, long)]
    trials: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

pub async fn run(mut config: EngineConfig, args: SensitivityArgs) -> Result<()> {
    let parameter: SensitivityParameter = args.parameter.parse().map_err(|e: String| anyhow!(e))?;
    if let Some(trials) = args.trials {
        config.monte_carlo.trials = trials;
    }
    // A fixed seed keeps the sweep points comparable
    if config.monte_carlo.seed.is_none() {
        config.monte_carlo.seed = Some(42);
    }
    config.validate()?;

    let portfolio: Portfolio = input::load(&args.portfolio)?;
    let scenarios = config.scenario_catalog().context("Invalid scenario overrides")?.snapshot();
    let orchestrator = StressTestOrchestrator::new(config.monte_carlo.clone(), config.orchestrator.clone());

    let cancel = CancellationHandle::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping sensitivity sweep...");
        handle.cancel();
    })
    .context("Error setting Ctrl+C handler")?;

    let report = orchestrator
        .sensitivity_with_cancel(&scenarios, &portfolio, parameter, (args.min, args.max), args.steps, &cancel)
        .await
        .context("Sensitivity analysis failed")?;

    if print_structured(&report, args.format)? {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![report.parameter.name(), "Risk Score", "Tier", "Worst Case"]);
    for point in &report.points {
        table.add_row(vec![
            Cell::new(format!("{:.4}", point.value)),
            Cell::new(format!("{:.2}", point.risk_score)),
            Cell::new(point.risk_tier),
            Cell::new(percent(point.worst_case_impact)).fg(impact_color(point.worst_case_impact)),
        ]);
    }
    println!("{table}");
    println!("Sensitivity score (coefficient of variation): {:.4}", report.sensitivity_score);
    if report.cancelled {
        println!("{}", "Sweep was cancelled; only finished points are shown".yellow());
    }
    Ok(())
}
