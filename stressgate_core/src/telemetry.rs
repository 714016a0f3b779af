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

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const TRIALS_TOTAL: &str = "stressgate_trials_total";
pub const SIMULATION_SECONDS: &str = "stressgate_simulation_seconds";
pub const SCENARIOS_TOTAL: &str = "stressgate_scenarios_total";
pub const RISK_SCORE: &str = "stressgate_risk_score";
pub const PORTFOLIO_SHARPE: &str = "stressgate_portfolio_sharpe";
pub const TRADES_EVALUATED: &str = "stressgate_trades_evaluated_total";
pub const BREAKER_TRIPS: &str = "stressgate_breaker_trips_total";
pub const DAILY_PNL: &str = "stressgate_daily_pnl";
pub const CALIBRATION_FALLBACKS: &str = "stressgate_calibration_fallbacks_total";

/// Install a global fmt subscriber. `RUST_LOG` wins over `default_directive`.
/// Returns false if a subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

/// Register descriptions with whatever metrics recorder is installed
pub fn describe_metrics() {
    describe_counter!(TRIALS_TOTAL, "Monte Carlo trials evaluated");
    describe_histogram!(SIMULATION_SECONDS, Unit::Seconds, "Wall time of one scenario simulation");
    describe_counter!(SCENARIOS_TOTAL, "Scenarios run, by outcome status");
    describe_gauge!(RISK_SCORE, "Overall risk score of the latest stress test");
    describe_gauge!(PORTFOLIO_SHARPE, "Sharpe ratio of the latest calibrated portfolio");
    describe_counter!(TRADES_EVALUATED, "Trade proposals evaluated by the gate, by decision");
    describe_counter!(BREAKER_TRIPS, "Circuit breaker trips, by breaker");
    describe_gauge!(DAILY_PNL, "P&L accumulated in the current daily window");
    describe_counter!(CALIBRATION_FALLBACKS, "Calibrations that fell back to Kelly sizing");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let first = init_tracing("warn");
        let second = init_tracing("warn");
        // Another test may have installed a subscriber first
        assert!(!(first && second));
        describe_metrics();
    }
}
