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

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;
use tracing::warn;

use crate::simulator::SimulationRun;

/// Terminal value fraction a trial must retain to count as surviving
pub const SURVIVAL_THRESHOLD: f64 = 0.5;

/// Errors related to metric reduction
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Confidence must be in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Risk metrics for one scenario. Every field except `trials` and
/// `confidence` lies in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Expected fractional loss across trials
    pub portfolio_impact: f64,

    /// Loss of the single worst trial
    pub max_drawdown: f64,

    /// Loss at the (1 - confidence) quantile
    pub var: f64,

    /// Mean loss of trials at or beyond the VaR threshold
    pub expected_shortfall: f64,

    /// Fraction of trials retaining at least half the starting value
    pub survival_probability: f64,

    pub confidence: f64,

    pub trials: usize,
}

/// Reduce a simulation run to risk metrics
pub fn reduce(run: &SimulationRun, confidence: f64) -> MetricsResult<RiskMetrics> {
    reduce_values(&run.normalized_values(), confidence)
}

/// Reduce normalized terminal values (1.0 = no loss) to risk metrics
pub fn reduce_values(values: &[f64], confidence: f64) -> MetricsResult<RiskMetrics> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(MetricsError::InvalidConfidence(confidence));
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.len() < values.len() {
        warn!(
            "Dropped {} non-finite trial values before computing metrics",
            values.len() - sorted.len()
        );
    }
    if sorted.is_empty() {
        return Err(MetricsError::InsufficientData(
            "no finite trial values".to_string(),
        ));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let worst = sorted[0];
    let threshold = percentile(&sorted, (1.0 - confidence) * 100.0);

    let tail: Vec<f64> = sorted.iter().copied().take_while(|v| *v <= threshold).collect();
    let expected_shortfall = if tail.is_empty() {
        0.0
    } else {
        clamp_unit(1.0 - tail.iter().sum::<f64>() / tail.len() as f64)
    };

    let survivors = sorted.iter().filter(|v| **v >= SURVIVAL_THRESHOLD).count();

    Ok(RiskMetrics {
        portfolio_impact: clamp_unit(1.0 - mean),
        max_drawdown: clamp_unit(1.0 - worst),
        var: clamp_unit(1.0 - threshold),
        expected_shortfall,
        survival_probability: survivors as f64 / n,
        confidence,
        trials: sorted.len(),
    })
}

/// Percentile of ascending `sorted` data with linear interpolation between
/// closest ranks. `pct` is in [0, 100].
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// Gaussian value at risk of a return distribution, as a positive loss
pub fn parametric_var(expected_return: f64, volatility: f64, confidence: f64) -> MetricsResult<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(MetricsError::InvalidConfidence(confidence));
    }
    if !expected_return.is_finite() || !volatility.is_finite() || volatility < 0.0 {
        return Err(MetricsError::InsufficientData(format!(
            "return {} / volatility {} cannot be used",
            expected_return, volatility
        )));
    }

    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| MetricsError::InsufficientData(e.to_string()))?;
    let z = standard.inverse_cdf(1.0 - confidence);
    Ok((-(expected_return + z * volatility)).max(0.0))
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&data, 50.0) - 3.0).abs() < 1e-12);
        assert!((percentile(&data, 5.0) - 1.2).abs() < 1e-12);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&data, 100.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_known_values() {
        let values: Vec<f64> = (0..=100).map(|i| 0.4 + i as f64 * 0.006).collect();
        let metrics = reduce_values(&values, 0.95).unwrap();

        // Values span 0.4..=1.0 uniformly; mean 0.7
        assert!((metrics.portfolio_impact - 0.3).abs() < 1e-9);
        assert!((metrics.max_drawdown - 0.6).abs() < 1e-9);
        // 5th percentile = 0.4 + 5 * 0.006
        assert!((metrics.var - 0.57).abs() < 1e-9);
        assert!(metrics.expected_shortfall >= metrics.var);
        // 0.4 + i * 0.006 >= 0.5 for i >= 17
        assert!((metrics.survival_probability - 84.0 / 101.0).abs() < 1e-9);
        assert_eq!(metrics.trials, 101);
    }

    #[test]
    fn test_half_value_counts_as_survival() {
        let metrics = reduce_values(&[0.5, 0.5, 0.5, 0.5], 0.95).unwrap();
        assert_eq!(metrics.survival_probability, 1.0);

        let metrics = reduce_values(&[0.5, 0.4999, 0.9, 0.1], 0.95).unwrap();
        assert!((metrics.survival_probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_clamped_to_unit_interval() {
        let values = [-2.0, -0.5, 1.3, 1.8];
        let metrics = reduce_values(&values, 0.95).unwrap();

        for value in [
            metrics.portfolio_impact,
            metrics.max_drawdown,
            metrics.var,
            metrics.expected_shortfall,
            metrics.survival_probability,
        ] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(metrics.max_drawdown, 1.0);
    }

    #[test]
    fn test_identical_values() {
        let metrics = reduce_values(&[0.9; 10], 0.95).unwrap();
        assert!((metrics.var - 0.1).abs() < 1e-12);
        assert!((metrics.expected_shortfall - 0.1).abs() < 1e-12);
        assert_eq!(metrics.survival_probability, 1.0);
    }

    #[test]
    fn test_empty_and_invalid_inputs() {
        assert!(matches!(
            reduce_values(&[], 0.95),
            Err(MetricsError::InsufficientData(_))
        ));
        assert!(matches!(
            reduce_values(&[f64::NAN], 0.95),
            Err(MetricsError::InsufficientData(_))
        ));
        assert!(matches!(
            reduce_values(&[1.0], 1.0),
            Err(MetricsError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn test_parametric_var() {
        // z(0.05) ~= -1.6449
        let var = parametric_var(0.05, 0.2, 0.95).unwrap();
        assert!((var - (1.644_853_6 * 0.2 - 0.05)).abs() < 1e-5);

        // A strongly positive return leaves no loss at this confidence
        assert_eq!(parametric_var(1.0, 0.1, 0.95).unwrap(), 0.0);
    }
}
