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

//! Risk-profit calibration of strategy allocations.
//!
//! Long-only maximum-Sharpe weights are found by solving the equivalent
//! quadratic program `min y'Σy  s.t. (μ - rf)'y = 1, y >= 0` with accelerated
//! projected gradient descent and rescaling `w = y / Σy`. Half-Kelly sizing is
//! computed independently and survives an optimizer failure.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::risk_metrics;
use crate::telemetry;

/// Weights below this are dropped and the rest renormalized
const WEIGHT_CUTOFF: f64 = 1e-4;

/// Volatility below which the Sharpe ratio is undefined
const MIN_VOLATILITY: f64 = 1e-12;

/// Errors related to calibration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Optimization failure: {0}")]
    OptimizationFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for the calibrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Correlation assumed for pairs with no explicit entry
    pub default_correlation: f64,

    /// Fraction of full Kelly to allocate
    pub kelly_multiplier: f64,

    /// Iteration cap for the optimizer
    pub max_iterations: usize,

    /// Convergence tolerance of the optimizer
    pub tolerance: f64,

    /// Annual risk-free rate
    pub risk_free_rate: f64,

    /// Confidence level of the parametric VaR
    pub var_confidence: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_correlation: 0.2, // Mild positive co-movement
            kelly_multiplier: 0.5,    // Half Kelly
            max_iterations: 10_000,
            tolerance: 1e-9,
            risk_free_rate: 0.02, // 2% annual
            var_confidence: 0.95,
        }
    }
}

/// Return and trade statistics of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,

    /// Version of the strategy set this snapshot belongs to
    #[serde(default)]
    pub version: u64,

    /// Expected annual return
    pub expected_return: f64,

    /// Annualised volatility
    pub volatility: f64,

    /// Correlations with other strategies, keyed by strategy id
    #[serde(default)]
    pub correlations: HashMap<String, f64>,

    /// Capital currently allocated
    #[serde(default)]
    pub allocated_capital: f64,

    /// Fraction of trades that win
    #[serde(default)]
    pub win_rate: f64,

    /// Average fractional gain of a winning trade
    #[serde(default)]
    pub avg_win: f64,

    /// Average fractional loss of a losing trade, as a positive number
    #[serde(default)]
    pub avg_loss: f64,
}

impl Strategy {
    pub fn new(id: impl Into<String>, expected_return: f64, volatility: f64) -> Self {
        Self {
            id: id.into(),
            version: 0,
            expected_return,
            volatility,
            correlations: HashMap::new(),
            allocated_capital: 0.0,
            win_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn with_trade_stats(mut self, win_rate: f64, avg_win: f64, avg_loss: f64) -> Self {
        self.win_rate = win_rate;
        self.avg_win = avg_win;
        self.avg_loss = avg_loss;
        self
    }

    pub fn with_correlation(mut self, other: impl Into<String>, correlation: f64) -> Self {
        self.correlations.insert(other.into(), correlation);
        self
    }
}

/// Immutable, versioned set of strategy snapshots. Updates produce a new set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySet {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub strategies: Vec<Strategy>,
}

impl StrategySet {
    pub fn new(version: u64, strategies: Vec<Strategy>) -> Self {
        let strategies = strategies
            .into_iter()
            .map(|s| Strategy { version, ..s })
            .collect();
        Self {
            version,
            created_at: Utc::now(),
            strategies,
        }
    }

    /// Next version of the set with new strategy snapshots
    pub fn supersede(&self, strategies: Vec<Strategy>) -> Self {
        Self::new(self.version + 1, strategies)
    }
}

/// Kelly sizing for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellySizing {
    /// Full Kelly fraction, floored at zero
    pub kelly_fraction: f64,

    /// Kelly fraction after the configured multiplier
    pub conservative_fraction: f64,

    /// Capital suggested by the conservative fraction
    pub suggested_allocation: f64,
}

/// Statistics of the optimized portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    /// Undefined for a riskless portfolio
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_estimate: f64,
    /// Gaussian VaR of the portfolio return, as a positive loss
    pub parametric_var: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    /// Optimizer converged
    Optimized,
    /// Optimizer failed; only Kelly sizing is available
    KellyOnly { reason: String },
    /// Inputs could not be calibrated
    Inconclusive { reason: String },
}

/// Output of one calibration pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Version of the strategy set that was calibrated
    pub strategy_set_version: u64,
    pub calibrated_at: DateTime<Utc>,
    pub available_capital: f64,
    pub risk_free_rate: f64,
    pub optimization_success: bool,
    pub status: CalibrationStatus,
    pub iterations: usize,
    /// Long-only weights summing to 1; empty unless optimized
    pub optimal_weights: BTreeMap<String, f64>,
    /// Weights scaled to the available capital
    pub capital_allocation: BTreeMap<String, f64>,
    pub kelly_weights: BTreeMap<String, KellySizing>,
    pub portfolio: Option<PortfolioStats>,
}

impl CalibrationResult {
    fn inconclusive(available_capital: f64, risk_free_rate: f64, reason: String) -> Self {
        Self {
            strategy_set_version: 0,
            calibrated_at: Utc::now(),
            available_capital,
            risk_free_rate,
            optimization_success: false,
            status: CalibrationStatus::Inconclusive { reason },
            iterations: 0,
            optimal_weights: BTreeMap::new(),
            capital_allocation: BTreeMap::new(),
            kelly_weights: BTreeMap::new(),
            portfolio: None,
        }
    }
}

/// Full Kelly fraction `(b·p − q) / b` with `b = avg_win / avg_loss`,
/// floored at zero. Zero when the payoff ratio is undefined.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if !(avg_loss > 0.0) || !(avg_win > 0.0) || !(0.0..=1.0).contains(&win_rate) {
        return 0.0;
    }
    let b = avg_win / avg_loss;
    let q = 1.0 - win_rate;
    ((b * win_rate - q) / b).max(0.0)
}

/// Max drawdown estimate from expected return and volatility
pub fn max_drawdown_estimate(expected_return: f64, volatility: f64) -> f64 {
    if expected_return > 0.0 {
        volatility.powi(2) / (4.0 * expected_return)
    } else {
        2.0 * volatility
    }
}

/// Converged optimizer output
#[derive(Debug, Clone)]
pub struct OptimizerSolution {
    pub weights: DVector<f64>,
    pub iterations: usize,
}

/// Computes allocations from strategy statistics
#[derive(Debug, Clone, Default)]
pub struct RiskProfitCalibrator {
    config: CalibrationConfig,
}

impl RiskProfitCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate a versioned strategy set
    pub fn calibrate_set(&self, set: &StrategySet, available_capital: f64, risk_free_rate: f64) -> CalibrationResult {
        let mut result = self.calibrate(&set.strategies, available_capital, risk_free_rate);
        result.strategy_set_version = set.version;
        result
    }

    /// Compute max-Sharpe weights and Kelly sizing. Never fails: problems are
    /// reported through `status`.
    pub fn calibrate(&self, strategies: &[Strategy], available_capital: f64, risk_free_rate: f64) -> CalibrationResult {
        if let Err(err) = self.validate(strategies, available_capital, risk_free_rate) {
            warn!("Calibration inconclusive: {}", err);
            return CalibrationResult::inconclusive(available_capital, risk_free_rate, err.to_string());
        }

        let kelly_weights = self.kelly_weights(strategies, available_capital);
        let expected = DVector::from_iterator(strategies.len(), strategies.iter().map(|s| s.expected_return));
        let covariance = self.covariance_matrix(strategies);

        let mut result = CalibrationResult {
            strategy_set_version: 0,
            calibrated_at: Utc::now(),
            available_capital,
            risk_free_rate,
            optimization_success: false,
            status: CalibrationStatus::Optimized,
            iterations: 0,
            optimal_weights: BTreeMap::new(),
            capital_allocation: BTreeMap::new(),
            kelly_weights,
            portfolio: None,
        };

        match self.max_sharpe_weights(&expected, &covariance, risk_free_rate) {
            Ok(solution) => {
                let stats = self.portfolio_stats(&solution.weights, &expected, &covariance, risk_free_rate);
                for (strategy, weight) in strategies.iter().zip(solution.weights.iter()) {
                    result.optimal_weights.insert(strategy.id.clone(), *weight);
                    result
                        .capital_allocation
                        .insert(strategy.id.clone(), weight * available_capital);
                }
                result.optimization_success = true;
                result.iterations = solution.iterations;

                if let Some(sharpe) = stats.sharpe_ratio {
                    gauge!(telemetry::PORTFOLIO_SHARPE, sharpe);
                }
                info!(
                    "Calibrated {} strategies in {} iterations: return {:.4}, volatility {:.4}",
                    strategies.len(),
                    solution.iterations,
                    stats.expected_return,
                    stats.volatility
                );
                result.portfolio = Some(stats);
            }
            Err(err) => {
                warn!("Max-Sharpe optimization failed, falling back to Kelly sizing: {}", err);
                counter!(telemetry::CALIBRATION_FALLBACKS, 1);
                result.status = CalibrationStatus::KellyOnly {
                    reason: err.to_string(),
                };
            }
        }

        result
    }

    fn validate(&self, strategies: &[Strategy], available_capital: f64, risk_free_rate: f64) -> Result<(), CalibrationError> {
        if strategies.is_empty() {
            return Err(CalibrationError::InsufficientData("no strategies to calibrate".to_string()));
        }
        if !available_capital.is_finite() || available_capital <= 0.0 {
            return Err(CalibrationError::InsufficientData(format!(
                "available capital must be positive, got {}",
                available_capital
            )));
        }
        if !risk_free_rate.is_finite() {
            return Err(CalibrationError::InsufficientData("risk-free rate must be finite".to_string()));
        }

        let mut seen = HashSet::new();
        for strategy in strategies {
            if !seen.insert(strategy.id.as_str()) {
                return Err(CalibrationError::InvalidStrategy(format!("duplicate strategy id {}", strategy.id)));
            }
            if !strategy.expected_return.is_finite() {
                return Err(CalibrationError::InvalidStrategy(format!(
                    "{} has non-finite expected return",
                    strategy.id
                )));
            }
            if !strategy.volatility.is_finite() || strategy.volatility < 0.0 {
                return Err(CalibrationError::InvalidStrategy(format!(
                    "{} has invalid volatility {}",
                    strategy.id, strategy.volatility
                )));
            }
            if !(0.0..=1.0).contains(&strategy.win_rate) {
                return Err(CalibrationError::InvalidStrategy(format!(
                    "{} has win rate {} outside [0, 1]",
                    strategy.id, strategy.win_rate
                )));
            }
            if let Some((other, correlation)) = strategy
                .correlations
                .iter()
                .find(|(_, c)| !c.is_finite() || c.abs() > 1.0)
            {
                return Err(CalibrationError::InvalidStrategy(format!(
                    "{} has correlation {} with {}",
                    strategy.id, correlation, other
                )));
            }
        }
        Ok(())
    }

    /// Correlation between strategies `i` and `j`. The lower index's entry
    /// wins so the matrix stays symmetric.
    fn correlation(&self, strategies: &[Strategy], i: usize, j: usize) -> f64 {
        if i == j {
            return 1.0;
        }
        let (first, second) = if i < j {
            (&strategies[i], &strategies[j])
        } else {
            (&strategies[j], &strategies[i])
        };
        first
            .correlations
            .get(&second.id)
            .or_else(|| second.correlations.get(&first.id))
            .copied()
            .unwrap_or(self.config.default_correlation)
    }

    /// Covariance matrix `Σ_ij = σ_i σ_j ρ_ij`
    pub fn covariance_matrix(&self, strategies: &[Strategy]) -> DMatrix<f64> {
        let n = strategies.len();
        DMatrix::from_fn(n, n, |i, j| {
            strategies[i].volatility * strategies[j].volatility * self.correlation(strategies, i, j)
        })
    }

    /// Long-only weights maximizing the Sharpe ratio
    pub fn max_sharpe_weights(
        &self,
        expected: &DVector<f64>,
        covariance: &DMatrix<f64>,
        risk_free_rate: f64,
    ) -> Result<OptimizerSolution, CalibrationError> {
        // The budget constraint leaves a lone strategy exactly one feasible point
        if expected.len() == 1 {
            return Ok(OptimizerSolution {
                weights: DVector::from_element(1, 1.0),
                iterations: 0,
            });
        }

        let excess = expected.add_scalar(-risk_free_rate);
        if excess.iter().all(|a| *a <= 0.0) {
            return Err(CalibrationError::OptimizationFailure(
                "no strategy beats the risk-free rate".to_string(),
            ));
        }

        let eigen = covariance.clone().symmetric_eigen();
        let largest = eigen.eigenvalues.iter().copied().fold(0.0, f64::max);
        let smallest = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        if smallest < -1e-10 * largest.max(1.0) {
            return Err(CalibrationError::OptimizationFailure(format!(
                "covariance matrix is not positive semi-definite (eigenvalue {:.3e})",
                smallest
            )));
        }

        let lipschitz = 2.0 * largest;
        let step = if lipschitz > MIN_VOLATILITY { 1.0 / lipschitz } else { 1.0 };
        let tolerance = self.config.tolerance;
        let objective = |y: &DVector<f64>| y.dot(&(covariance * y));

        let mut x = project_onto_budget(&DVector::zeros(excess.len()), &excess);
        let mut v = x.clone();
        let mut t = 1.0_f64;

        for iteration in 1..=self.config.max_iterations {
            let gradient = (covariance * &v) * 2.0;
            let next = project_onto_budget(&(&v - gradient * step), &excess);

            let delta = (&next - &x).amax();
            if delta <= tolerance * (1.0 + next.amax()) {
                let gradient = (covariance * &next) * 2.0;
                let residual = (&next - project_onto_budget(&(&next - gradient * step), &excess)).amax();
                if residual <= tolerance * (1.0 + next.amax()) {
                    debug!("Optimizer converged after {} iterations", iteration);
                    let total = next.sum();
                    return Ok(OptimizerSolution {
                        weights: clean_weights(next / total),
                        iterations: iteration,
                    });
                }
            }

            // Restart momentum when the objective goes up
            if objective(&next) > objective(&x) {
                t = 1.0;
                v = next.clone();
            } else {
                let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
                v = &next + (&next - &x) * ((t - 1.0) / t_next);
                t = t_next;
            }
            x = next;
        }

        Err(CalibrationError::OptimizationFailure(format!(
            "no convergence after {} iterations",
            self.config.max_iterations
        )))
    }

    /// Half-Kelly sizing per strategy, scaled down if it would exceed the capital
    pub fn kelly_weights(&self, strategies: &[Strategy], available_capital: f64) -> BTreeMap<String, KellySizing> {
        let mut sizing: BTreeMap<String, KellySizing> = strategies
            .iter()
            .map(|s| {
                let full = kelly_fraction(s.win_rate, s.avg_win, s.avg_loss);
                let conservative = full * self.config.kelly_multiplier;
                (
                    s.id.clone(),
                    KellySizing {
                        kelly_fraction: full,
                        conservative_fraction: conservative,
                        suggested_allocation: conservative * available_capital,
                    },
                )
            })
            .collect();

        let total: f64 = sizing.values().map(|k| k.suggested_allocation).sum();
        if total > available_capital {
            let scale = available_capital / total;
            debug!("Kelly allocations exceed capital, scaling by {:.4}", scale);
            for entry in sizing.values_mut() {
                entry.suggested_allocation *= scale;
            }
        }

        sizing
    }

    fn portfolio_stats(
        &self,
        weights: &DVector<f64>,
        expected: &DVector<f64>,
        covariance: &DMatrix<f64>,
        risk_free_rate: f64,
    ) -> PortfolioStats {
        let expected_return = weights.dot(expected);
        let volatility = weights.dot(&(covariance * weights)).max(0.0).sqrt();
        let sharpe_ratio = if volatility > MIN_VOLATILITY {
            Some((expected_return - risk_free_rate) / volatility)
        } else {
            None
        };
        let parametric_var = risk_metrics::parametric_var(expected_return, volatility, self.config.var_confidence)
            .unwrap_or_else(|err| {
                warn!("Parametric VaR unavailable: {}", err);
                0.0
            });

        PortfolioStats {
            expected_return,
            volatility,
            sharpe_ratio,
            max_drawdown_estimate: max_drawdown_estimate(expected_return, volatility),
            parametric_var,
        }
    }
}

/// Euclidean projection onto `{y >= 0, a'y = 1}`.
///
/// The projection is `y = max(0, z + λa)` where λ solves
/// `Σ a_i max(0, z_i + λ a_i) = 1`; the left side is non-decreasing in λ, so
/// λ is found by bisection. Requires at least one positive `a_i`.
fn project_onto_budget(z: &DVector<f64>, a: &DVector<f64>) -> DVector<f64> {
    let budget = |lambda: f64| -> f64 {
        z.iter()
            .zip(a.iter())
            .map(|(zi, ai)| ai * (zi + lambda * ai).max(0.0))
            .sum()
    };

    let mut hi = 1.0;
    for _ in 0..200 {
        if budget(hi) >= 1.0 {
            break;
        }
        hi *= 2.0;
    }
    let mut lo = -1.0;
    for _ in 0..200 {
        if budget(lo) <= 1.0 {
            break;
        }
        lo *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if budget(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-15 * hi.abs().max(1.0) {
            break;
        }
    }

    z.zip_map(a, |zi, ai| (zi + hi * ai).max(0.0))
}

fn clean_weights(weights: DVector<f64>) -> DVector<f64> {
    let cleaned = weights.map(|w| if w < WEIGHT_CUTOFF { 0.0 } else { w });
    let total = cleaned.sum();
    if total > 0.0 {
        cleaned / total
    } else {
        weights
    }
}

/// Calibration seam used by callers that refresh allocations over time
#[async_trait]
pub trait Calibrator: Send + Sync {
    /// Calibrate `set`, reusing the previous result when the set is unchanged
    async fn recalibrate(&self, set: &StrategySet, available_capital: f64) -> Result<CalibrationResult, CalibrationError>;

    /// Most recent result, if any
    async fn latest(&self) -> Option<CalibrationResult>;
}

/// Caches the latest calibration and runs new ones off the async runtime
pub struct CalibrationService {
    calibrator: Arc<RiskProfitCalibrator>,
    latest: Arc<RwLock<Option<CalibrationResult>>>,
}

impl CalibrationService {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            calibrator: Arc::new(RiskProfitCalibrator::new(config)),
            latest: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl Calibrator for CalibrationService {
    async fn recalibrate(&self, set: &StrategySet, available_capital: f64) -> Result<CalibrationResult, CalibrationError> {
        if let Some(previous) = self.latest.read().await.as_ref() {
            if previous.strategy_set_version == set.version && previous.available_capital == available_capital {
                debug!("Strategy set version {} unchanged, reusing calibration", set.version);
                return Ok(previous.clone());
            }
        }

        let calibrator = Arc::clone(&self.calibrator);
        let set = set.clone();
        let result = tokio::task::spawn_blocking(move || {
            let risk_free_rate = calibrator.config().risk_free_rate;
            calibrator.calibrate_set(&set, available_capital, risk_free_rate)
        })
        .await
        .map_err(|e| CalibrationError::Internal(format!("calibration task failed: {}", e)))?;

        *self.latest.write().await = Some(result.clone());
        Ok(result)
    }

    async fn latest(&self) -> Option<CalibrationResult> {
        self.latest.read().await.clone()
    }
}

/// Create a calibration service with the given configuration
pub fn create_calibration_service(config: CalibrationConfig) -> Arc<dyn Calibrator> {
    Arc::new(CalibrationService::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator() -> RiskProfitCalibrator {
        RiskProfitCalibrator::new(CalibrationConfig::default())
    }

    fn book() -> Vec<Strategy> {
        vec![
            Strategy::new("arbitrage", 0.12, 0.08)
                .with_trade_stats(0.6, 0.15, 0.05)
                .with_correlation("momentum", 0.3),
            Strategy::new("momentum", 0.18, 0.20).with_trade_stats(0.55, 0.10, 0.08),
            Strategy::new("market_making", 0.08, 0.05).with_trade_stats(0.7, 0.02, 0.03),
        ]
    }

    #[test]
    fn test_kelly_fraction_example() {
        let full = kelly_fraction(0.6, 0.15, 0.05);
        assert!((full - 1.4 / 3.0).abs() < 1e-12);
        assert!((full * 0.5 - 0.7 / 3.0).abs() < 1e-12);

        assert_eq!(kelly_fraction(0.3, 0.05, 0.05), 0.0);
        assert_eq!(kelly_fraction(0.6, 0.15, 0.0), 0.0);
    }

    #[test]
    fn test_weights_are_long_only_and_sum_to_one() {
        let result = calibrator().calibrate(&book(), 1_000_000.0, 0.02);

        assert!(result.optimization_success);
        assert_eq!(result.status, CalibrationStatus::Optimized);
        let total: f64 = result.optimal_weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(result.optimal_weights.values().all(|w| *w >= 0.0));

        let capital: f64 = result.capital_allocation.values().sum();
        assert!((capital - 1_000_000.0).abs() < 1e-3);

        let stats = result.portfolio.unwrap();
        assert!(stats.sharpe_ratio.unwrap() > 0.0);
    }

    #[test]
    fn test_optimizer_matches_closed_form_for_uncorrelated_assets() {
        // With zero correlation and no binding bounds, w_i ∝ (μ_i - rf) / σ_i²
        let calibrator = RiskProfitCalibrator::new(CalibrationConfig {
            default_correlation: 0.0,
            ..Default::default()
        });
        let strategies = vec![Strategy::new("a", 0.10, 0.10), Strategy::new("b", 0.06, 0.20)];
        let result = calibrator.calibrate(&strategies, 100.0, 0.02);

        let raw_a = 0.08 / 0.01;
        let raw_b = 0.04 / 0.04;
        let expected_a = raw_a / (raw_a + raw_b);
        assert!((result.optimal_weights["a"] - expected_a).abs() < 1e-6);
    }

    #[test]
    fn test_optimized_sharpe_beats_equal_weights() {
        let calibrator = calibrator();
        let strategies = book();
        let result = calibrator.calibrate(&strategies, 1.0, 0.02);
        let optimized = result.portfolio.unwrap().sharpe_ratio.unwrap();

        let expected = DVector::from_iterator(3, strategies.iter().map(|s| s.expected_return));
        let covariance = calibrator.covariance_matrix(&strategies);
        let equal = DVector::from_element(3, 1.0 / 3.0);
        let equal_sharpe = (equal.dot(&expected) - 0.02) / equal.dot(&(&covariance * &equal)).sqrt();

        assert!(optimized >= equal_sharpe - 1e-9);
    }

    #[test]
    fn test_single_riskless_strategy_gets_full_weight() {
        let strategies = vec![Strategy::new("treasury", 0.05, 0.0)];
        let result = calibrator().calibrate(&strategies, 10_000.0, 0.02);

        assert!(result.optimization_success);
        assert!((result.optimal_weights["treasury"] - 1.0).abs() < 1e-12);
        let stats = result.portfolio.unwrap();
        assert_eq!(stats.sharpe_ratio, None);
        assert_eq!(stats.volatility, 0.0);
    }

    #[test]
    fn test_single_strategy_below_risk_free_rate_is_fully_weighted() {
        let strategies = vec![Strategy::new("s", 0.01, 0.0)];
        let result = calibrator().calibrate(&strategies, 1_000.0, 0.02);

        assert!(result.optimization_success);
        assert_eq!(result.status, CalibrationStatus::Optimized);
        assert!((result.optimal_weights["s"] - 1.0).abs() < 1e-12);
        assert!((result.capital_allocation["s"] - 1_000.0).abs() < 1e-9);

        let risky = vec![Strategy::new("r", 0.02, 0.3)];
        let result = calibrator().calibrate(&risky, 1_000.0, 0.02);
        assert!(result.optimization_success);
        assert!(result.portfolio.unwrap().sharpe_ratio.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_optimizer_failure_keeps_kelly() {
        // Nothing beats the risk-free rate
        let strategies = vec![
            Strategy::new("a", 0.01, 0.1).with_trade_stats(0.6, 0.15, 0.05),
            Strategy::new("b", 0.00, 0.2),
        ];
        let result = calibrator().calibrate(&strategies, 100_000.0, 0.02);

        assert!(!result.optimization_success);
        assert!(matches!(result.status, CalibrationStatus::KellyOnly { .. }));
        assert!(result.optimal_weights.is_empty());
        assert!(result.portfolio.is_none());
        let kelly = &result.kelly_weights["a"];
        assert!((kelly.suggested_allocation - 100_000.0 * 0.7 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_kelly_allocations_capped_at_capital() {
        let calibrator = RiskProfitCalibrator::new(CalibrationConfig {
            kelly_multiplier: 1.0,
            ..Default::default()
        });
        let strategies: Vec<Strategy> = (0..4)
            .map(|i| Strategy::new(format!("s{}", i), 0.1, 0.1).with_trade_stats(0.8, 0.2, 0.05))
            .collect();
        let sizing = calibrator.kelly_weights(&strategies, 1_000.0);

        let total: f64 = sizing.values().map(|k| k.suggested_allocation).sum();
        assert!((total - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_inputs_are_inconclusive() {
        let result = calibrator().calibrate(&[], 1_000.0, 0.02);
        assert!(matches!(result.status, CalibrationStatus::Inconclusive { .. }));

        let bad = vec![Strategy::new("x", 0.1, -0.2)];
        let result = calibrator().calibrate(&bad, 1_000.0, 0.02);
        assert!(matches!(result.status, CalibrationStatus::Inconclusive { .. }));

        let duplicate = vec![Strategy::new("x", 0.1, 0.2), Strategy::new("x", 0.1, 0.2)];
        assert!(!calibrator().calibrate(&duplicate, 1_000.0, 0.02).optimization_success);
    }

    #[test]
    fn test_covariance_is_symmetric() {
        let mut strategies = book();
        strategies[1].correlations.insert("arbitrage".to_string(), -0.5);
        let covariance = calibrator().covariance_matrix(&strategies);

        assert_eq!(covariance, covariance.transpose());
        // The lower index's entry is used
        assert!((covariance[(0, 1)] - 0.08 * 0.20 * 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_drawdown_estimate() {
        assert!((max_drawdown_estimate(0.1, 0.2) - 0.1).abs() < 1e-12);
        assert!((max_drawdown_estimate(-0.1, 0.2) - 0.4).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_service_skips_unchanged_version() {
        let service = CalibrationService::new(CalibrationConfig::default());
        let set = StrategySet::new(1, book());

        let first = service.recalibrate(&set, 500_000.0).await.unwrap();
        let second = service.recalibrate(&set, 500_000.0).await.unwrap();
        assert_eq!(first.calibrated_at, second.calibrated_at);
        assert_eq!(first.strategy_set_version, 1);

        let next = set.supersede(book());
        let third = service.recalibrate(&next, 500_000.0).await.unwrap();
        assert_eq!(third.strategy_set_version, 2);
        assert_eq!(service.latest().await.unwrap().strategy_set_version, 2);
    }
}
