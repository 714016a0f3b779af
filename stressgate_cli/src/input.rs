use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stressgate_core::circuit_breaker::TradeProposal;
use stressgate_core::{Strategy, StrategySet};

/// Read a JSON or YAML document, picking the format from the file extension
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "json" => serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display())),
        "yaml" | "yml" => serde_yaml::from_str(&raw).with_context(|| format!("Invalid YAML in {}", path.display())),
        other => Err(anyhow!(
            "Unsupported input format '{}' for {} (expected .json, .yaml or .yml)",
            other,
            path.display()
        )),
    }
}

/// Strategy statistics as written by hand or exported by the strategy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesFile {
    #[serde(default = "default_set_version")]
    pub version: u64,
    pub strategies: Vec<Strategy>,
}

fn default_set_version() -> u64 {
    1
}

impl StrategiesFile {
    pub fn into_set(self) -> StrategySet {
        StrategySet::new(self.version, self.strategies)
    }
}

/// One step of a gate replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Seconds to advance the replay clock before evaluating
    #[serde(default)]
    pub after_secs: i64,

    pub trade: TradeProposal,

    /// Realized profit to settle once the trade is allowed
    #[serde(default)]
    pub realized_profit: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use stressgate_core::Portfolio;

    fn write_temp(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_portfolio_json() {
        let file = write_temp(
            ".json",
            r#"{"total_value": 500000.0, "positions": {"ETH": {"size": 250000.0, "turnover_rate": 0.2}}}"#,
        );
        let portfolio: Portfolio = load(file.path()).unwrap();

        assert_eq!(portfolio.total_value, 500_000.0);
        assert_eq!(portfolio.positions["ETH"].size, 250_000.0);
        assert!(portfolio.validate().is_ok());
    }

    #[test]
    fn test_load_strategies_yaml() {
        let file = write_temp(
            ".yml",
            "strategies:\n  - id: basis\n    expected_return: 0.1\n    volatility: 0.05\n  - id: trend\n    expected_return: 0.2\n    volatility: 0.2\n    correlations:\n      basis: 0.3\n",
        );
        let set = load::<StrategiesFile>(file.path()).unwrap().into_set();

        assert_eq!(set.version, 1);
        assert_eq!(set.strategies.len(), 2);
        assert_eq!(set.strategies[1].correlations["basis"], 0.3);
        assert!(set.strategies.iter().all(|s| s.version == 1));
    }

    #[test]
    fn test_load_replay_defaults() {
        let file = write_temp(
            ".yaml",
            "- trade:\n    id: t1\n    expected_profit: 120.0\n    expected_profit_percentage: 0.002\n    execution_cost: 15.0\n",
        );
        let steps: Vec<ReplayStep> = load(file.path()).unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].after_secs, 0);
        assert!(steps[0].realized_profit.is_none());
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = write_temp(".toml", "total_value = 1");
        let err = load::<Portfolio>(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported input format"));
    }
}
