use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use comfy_table::{Cell, ContentArrangement, Table};
use stressgate_core::calibration::CalibrationStatus;
use stressgate_core::{create_calibration_service, CalibrationResult, Calibrator, EngineConfig};

use crate::input::{self, StrategiesFile};
use crate::output::{percent, print_structured, OutputFormat};

#[derive(Args)]
pub struct CalibrateArgs {
    /// Strategy statistics (JSON or YAML)
    #[arg(short, long)]
    strategies: PathBuf,

    /// Capital to allocate
    #[arg(long, default_value = "100000")]
    capital: f64,

    /// Annual risk-free rate, overriding the configured one
    #[arg(short, long)]
    risk_free_rate: Option<f64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

pub async fn run(config: &EngineConfig, args: CalibrateArgs) -> Result<()> {
    let mut calibration = config.calibration.clone();
    if let Some(rate) = args.risk_free_rate {
        calibration.risk_free_rate = rate;
    }

    let set = input::load::<StrategiesFile>(&args.strategies)?.into_set();
    let service = create_calibration_service(calibration);
    let result = service
        .recalibrate(&set, args.capital)
        .await
        .context("Calibration failed")?;

    if print_structured(&result, args.format)? {
        return Ok(());
    }
    print_result(&result);
    Ok(())
}

fn print_result(result: &CalibrationResult) {
    match &result.status {
        CalibrationStatus::Optimized => println!(
            "{} after {} iterations",
            "Optimization converged".green(),
            result.iterations
        ),
        CalibrationStatus::KellyOnly { reason } => {
            println!("{} {}", "Optimization failed, Kelly sizing only:".yellow(), reason)
        }
        CalibrationStatus::Inconclusive { reason } => {
            println!("{} {}", "Calibration inconclusive:".red(), reason);
            return;
        }
    }

    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Strategy", "Weight", "Allocation", "Kelly", "Half Kelly", "Kelly Allocation"]);

    for (id, kelly) in &result.kelly_weights {
        let weight = result.optimal_weights.get(id);
        let allocation = result.capital_allocation.get(id);
        table.add_row(vec![
            Cell::new(id),
            Cell::new(weight.map(|w| percent(*w)).unwrap_or_else(|| "-".to_string())),
            Cell::new(allocation.map(|a| format!("{:.2}", a)).unwrap_or_else(|| "-".to_string())),
            Cell::new(percent(kelly.kelly_fraction)),
            Cell::new(percent(kelly.conservative_fraction)),
            Cell::new(format!("{:.2}", kelly.suggested_allocation)),
        ]);
    }
    println!("{table}");

    if let Some(stats) = &result.portfolio {
        let sharpe = stats
            .sharpe_ratio
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "Expected return {}  volatility {}  Sharpe {}  VaR {}  est. max drawdown {}",
            percent(stats.expected_return),
            percent(stats.volatility),
            sharpe,
            percent(stats.parametric_var),
            percent(stats.max_drawdown_estimate)
        );
    }
}
