use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use stressgate_core::{
    CancellationHandle, EngineConfig, Portfolio, ReportDocument, ScenarioOutcome, StressReport,
    StressTestOrchestrator,
};
use tracing::info;

use crate::input;
use crate::output::{impact_color, percent, print_structured, tier_label, OutputFormat};

#[derive(Args)]
pub struct StressArgs {
    /// Portfolio snapshot (JSON or YAML)
    #[arg(short, long)]
    portfolio: PathBuf,

    /// Monte Carlo trials per scenario
    #[arg(short, long)]
    trials: Option<usize>,

    /// Base seed for reproducible runs
    #[arg(short, long)]
    seed: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Write the full report document to this JSON file
    #[arg(short, long)]
    report: Option<PathBuf>,
}

pub async fn run(mut config: EngineConfig, args: StressArgs) -> Result<()> {
    if let Some(trials) = args.trials {
        config.monte_carlo.trials = trials;
    }
    if args.seed.is_some() {
        config.monte_carlo.seed = args.seed;
    }
    config.validate()?;

    let portfolio: Portfolio = input::load(&args.portfolio)?;
    let scenarios = config.scenario_catalog().context("Invalid scenario overrides")?.snapshot();
    let orchestrator = StressTestOrchestrator::new(config.monte_carlo.clone(), config.orchestrator.clone());

    let cancel = CancellationHandle::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, cancelling stress test...");
        handle.cancel();
    })
    .context("Error setting Ctrl+C handler")?;

    info!(
        "Running {} scenarios with {} trials each",
        scenarios.len(),
        config.monte_carlo.trials
    );
    let report = orchestrator
        .run_with_cancel(&scenarios, &portfolio, &cancel)
        .await
        .context("Stress test failed")?;

    let document = ReportDocument::from_report(&report);
    if let Some(path) = &args.report {
        let body = serde_json::to_string_pretty(&document)?;
        fs::write(path, body).with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report document written to {}", path.display());
    }

    if print_structured(&report, args.format)? {
        return Ok(());
    }
    print_report(&report, &document);
    Ok(())
}

fn print_report(report: &StressReport, document: &ReportDocument) {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Scenario", "Status", "Impact", "Max DD", "VaR", "ES", "Survival"]);

    for entry in &report.scenarios {
        let row = match &entry.outcome {
            ScenarioOutcome::Completed { metrics, .. } => vec![
                Cell::new(&entry.name),
                Cell::new("completed").fg(Color::Green),
                Cell::new(percent(metrics.portfolio_impact)).fg(impact_color(metrics.portfolio_impact)),
                Cell::new(percent(metrics.max_drawdown)),
                Cell::new(percent(metrics.var)),
                Cell::new(percent(metrics.expected_shortfall)),
                Cell::new(percent(metrics.survival_probability)),
            ],
            ScenarioOutcome::Inconclusive { reason } => vec![
                Cell::new(&entry.name),
                Cell::new("inconclusive").fg(Color::Yellow),
                Cell::new(reason),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ],
            ScenarioOutcome::Failed { kind, reason } => vec![
                Cell::new(&entry.name),
                Cell::new(format!("failed ({:?})", kind)).fg(Color::Red),
                Cell::new(reason),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ],
        };
        table.add_row(row);
    }
    println!("{table}");

    let summary = &document.executive_summary;
    println!(
        "\nOverall risk score: {:.1} ({})",
        summary.overall_risk_score,
        tier_label(summary.risk_tier)
    );
    println!(
        "Completed {}/{} scenarios in {} ms (seed {}, {:?} confidence)",
        summary.scenarios_completed,
        summary.scenarios_tested,
        report.elapsed_ms,
        report.base_seed,
        summary.confidence
    );
    if report.cancelled {
        println!("{}", "Run was cancelled; results are partial".yellow());
    } else if report.partial {
        println!("{}", "Some scenarios produced no metrics; results are partial".yellow());
    }

    for finding in &summary.key_findings {
        println!("  • {}", finding);
    }
    for action in &summary.immediate_actions {
        println!("  {} {}", "Act now:".red().bold(), action);
    }
    for kri in document.breached_indicators() {
        println!(
            "  {} {} = {:.3} (threshold {:.3})",
            "KRI breached:".red(),
            kri.name,
            kri.value,
            kri.threshold
        );
    }

    let plan = &document.action_plan;
    let buckets = [
        ("Immediate", &plan.immediate),
        ("Short term", &plan.short_term),
        ("Medium term", &plan.medium_term),
        ("Long term", &plan.long_term),
    ];
    println!("\n{}", "Action plan".bold());
    for (label, actions) in buckets.iter().filter(|(_, actions)| !actions.is_empty()) {
        println!("  {}:", label);
        for action in actions.iter() {
            println!("    - {}", action);
        }
    }
    println!("Next review: {}", document.next_review.format("%Y-%m-%d"));
}
