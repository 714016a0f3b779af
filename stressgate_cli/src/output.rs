use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use comfy_table::Color;
use serde::Serialize;
use stressgate_core::RiskTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Print `value` as JSON or YAML. Returns false for table output, which the
/// caller renders itself.
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<bool> {
    match format {
        OutputFormat::Table => Ok(false),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).context("Failed to serialize output")?);
            Ok(true)
        }
    }
}

pub fn tier_label(tier: RiskTier) -> ColoredString {
    let label = tier.to_string();
    match tier {
        RiskTier::Critical => label.red().bold(),
        RiskTier::High => label.red(),
        RiskTier::Moderate => label.yellow(),
        RiskTier::Low => label.green(),
    }
}

/// Cell colour for an impact fraction
pub fn impact_color(impact: f64) -> Color {
    if impact > 0.5 {
        Color::Red
    } else if impact > 0.2 {
        Color::Yellow
    } else {
        Color::Green
    }
}

pub fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impact_color_bands() {
        assert_eq!(impact_color(0.7), Color::Red);
        assert_eq!(impact_color(0.3), Color::Yellow);
        assert_eq!(impact_color(0.05), Color::Green);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.1234), "12.34%");
    }
}
