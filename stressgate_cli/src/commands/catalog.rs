use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use stressgate_core::{EngineConfig, Severity};

use crate::output::{percent, print_structured, OutputFormat};

#[derive(Args)]
pub struct CatalogArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

pub fn run(config: &EngineConfig, args: CatalogArgs) -> Result<()> {
    let catalog = config.scenario_catalog().context("Invalid scenario overrides")?;
    let scenarios = catalog.snapshot();

    if print_structured(&scenarios, args.format)? {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Scenario", "Type", "Probability", "Severity", "Description"]);

    for scenario in &scenarios {
        let severity = match scenario.severity {
            Severity::Extreme => Cell::new(scenario.severity).fg(Color::Red),
            Severity::High => Cell::new(scenario.severity).fg(Color::Yellow),
            _ => Cell::new(scenario.severity),
        };
        table.add_row(vec![
            Cell::new(&scenario.name),
            Cell::new(scenario.scenario_type()),
            Cell::new(percent(scenario.probability)),
            severity,
            Cell::new(&scenario.description),
        ]);
    }

    println!("{table}");
    println!("{} scenario(s) configured", scenarios.len());
    Ok(())
}
