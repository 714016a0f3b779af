// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::simulator::{SimulationError, SimulationResult};

/// A single holding in the portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Position size in currency units
    pub size: f64,

    /// Fraction of the position turned over per day
    #[serde(default)]
    pub turnover_rate: f64,
}

/// Operating assumptions used by the cost-based scenario payoffs.
///
/// These describe how the book trades rather than what it holds, and are
/// supplied by the caller alongside the positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingProfile {
    /// Average profit captured per executed trade
    pub avg_profit_per_trade: f64,

    /// Average notional per trade
    pub avg_trade_size: f64,

    /// Notional traded per day
    pub daily_volume: f64,

    /// Average size of a single protocol position
    pub avg_position_size: f64,

    /// Value held in liquidity-provider positions
    pub lp_positions_value: f64,

    /// Annual revenue, used to size compliance costs
    pub annual_revenue: f64,

    /// Net margin earned on traded volume
    pub profit_margin: f64,
}

impl Default for OperatingProfile {
    fn default() -> Self {
        Self {
            avg_profit_per_trade: 1_000.0,
            avg_trade_size: 50_000.0,
            daily_volume: 1_000_000.0,
            avg_position_size: 10_000.0,
            lp_positions_value: 0.0,
            annual_revenue: 1_000_000.0,
            profit_margin: 0.001,
        }
    }
}

/// Snapshot of the book that a stress test runs against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Total portfolio value in currency units
    pub total_value: f64,

    /// Positions keyed by asset symbol
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,

    /// When the snapshot was taken
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Operating assumptions for cost-based scenarios
    #[serde(default)]
    pub profile: OperatingProfile,
}

impl Portfolio {
    /// Create an empty portfolio with the given total value
    pub fn new(total_value: f64) -> Self {
        Self {
            total_value,
            positions: BTreeMap::new(),
            timestamp: Utc::now(),
            profile: OperatingProfile::default(),
        }
    }

    /// Builder-style helper to add a position
    pub fn with_position(mut self, asset: impl Into<String>, size: f64, turnover_rate: f64) -> Self {
        self.positions.insert(asset.into(), Position { size, turnover_rate });
        self
    }

    /// Builder-style helper to replace the operating profile
    pub fn with_profile(mut self, profile: OperatingProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Number of assets exposed to market shocks, at least one
    pub fn asset_count(&self) -> usize {
        self.positions.len().max(1)
    }

    /// Reject portfolios that cannot be stressed
    pub fn validate(&self) -> SimulationResult<()> {
        if !self.total_value.is_finite() || self.total_value <= 0.0 {
            return Err(SimulationError::InvalidPortfolio(format!(
                "total value must be positive, got {}",
                self.total_value
            )));
        }

        for (asset, position) in &self.positions {
            if !position.size.is_finite() || position.size < 0.0 {
                return Err(SimulationError::InvalidPortfolio(format!(
                    "position {} has invalid size {}",
                    asset, position.size
                )));
            }
        }

        let profile = &self.profile;
        let figures = [
            ("avg_profit_per_trade", profile.avg_profit_per_trade),
            ("avg_trade_size", profile.avg_trade_size),
            ("daily_volume", profile.daily_volume),
            ("avg_position_size", profile.avg_position_size),
            ("lp_positions_value", profile.lp_positions_value),
            ("annual_revenue", profile.annual_revenue),
            ("profit_margin", profile.profit_margin),
        ];
        if let Some((name, value)) = figures
            .iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(SimulationError::InvalidPortfolio(format!(
                "operating profile field {} is invalid: {}",
                name, value
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_non_positive_total() {
        assert!(Portfolio::new(0.0).validate().is_err());
        assert!(Portfolio::new(-10.0).validate().is_err());
        assert!(Portfolio::new(f64::NAN).validate().is_err());
        assert!(Portfolio::new(1_000.0).validate().is_ok());
    }

    #[test]
    fn test_asset_count_never_zero() {
        let empty = Portfolio::new(1_000.0);
        assert_eq!(empty.asset_count(), 1);

        let book = Portfolio::new(1_000.0)
            .with_position("ETH", 600.0, 0.1)
            .with_position("BTC", 400.0, 0.05);
        assert_eq!(book.asset_count(), 2);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{ "total_value": 250000.0, "positions": { "ETH": { "size": 250000.0 } } }"#;
        let portfolio: Portfolio = serde_json::from_str(json).unwrap();

        assert_eq!(portfolio.positions["ETH"].turnover_rate, 0.0);
        assert_eq!(portfolio.profile, OperatingProfile::default());
    }
}
