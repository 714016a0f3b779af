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

//! Engine configuration.
//!
//! Sources are layered: built-in defaults, then an optional file (any format
//! the `config` crate recognises by extension), then `STRESSGATE__*`
//! environment variables, e.g. `STRESSGATE__CIRCUIT_BREAKER__COOLDOWN_SECS=600`.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::calibration::CalibrationConfig;
use crate::circuit_breaker::{CircuitBreakerConfig, MAX_WINDOW_SECS};
use crate::scenario::{ScenarioCatalog, ScenarioOverride};
use crate::simulator::{MonteCarloConfig, SimulationError};
use crate::stress::OrchestratorConfig;

/// Current configuration schema version
pub const CONFIG_VERSION: u32 = 1;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema version of this configuration
    pub version: u32,

    pub monte_carlo: MonteCarloConfig,

    pub orchestrator: OrchestratorConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub calibration: CalibrationConfig,

    /// Per-scenario adjustments applied to the default catalog
    pub scenario_overrides: Vec<ScenarioOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            monte_carlo: MonteCarloConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            calibration: CalibrationConfig::default(),
            scenario_overrides: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> SettingsResult<Self> {
        dotenv::dotenv().ok();

        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("STRESSGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> SettingsResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(SettingsError::Invalid(format!(
                "unsupported configuration version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        let mc = &self.monte_carlo;
        if mc.trials == 0 {
            return Err(SettingsError::Invalid("monte_carlo.trials must be positive".to_string()));
        }
        if !(mc.confidence > 0.0 && mc.confidence < 1.0) {
            return Err(SettingsError::Invalid(format!(
                "monte_carlo.confidence must be in (0, 1), got {}",
                mc.confidence
            )));
        }
        if mc.chunk_size == 0 {
            return Err(SettingsError::Invalid("monte_carlo.chunk_size must be positive".to_string()));
        }
        if self.orchestrator.scenario_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "orchestrator.scenario_timeout_ms must be positive".to_string(),
            ));
        }

        let cb = &self.circuit_breaker;
        let fractions = [
            ("circuit_breaker.max_daily_loss", cb.max_daily_loss),
            ("circuit_breaker.max_single_loss", cb.max_single_loss),
            ("circuit_breaker.min_profit_threshold", cb.min_profit_threshold),
        ];
        if let Some((name, value)) = fractions.iter().find(|(_, v)| !(0.0..=1.0).contains(v)) {
            return Err(SettingsError::Invalid(format!("{} must be in [0, 1], got {}", name, value)));
        }
        if !(cb.reference_capital > 0.0) {
            return Err(SettingsError::Invalid(
                "circuit_breaker.reference_capital must be positive".to_string(),
            ));
        }
        let windows = [
            ("circuit_breaker.cooldown_secs", cb.cooldown_secs),
            ("circuit_breaker.daily_window_secs", cb.daily_window_secs),
            ("circuit_breaker.metrics_window_secs", cb.metrics_window_secs),
        ];
        if let Some((name, value)) = windows.iter().find(|(_, v)| *v > MAX_WINDOW_SECS) {
            return Err(SettingsError::Invalid(format!(
                "{} must be at most {} seconds, got {}",
                name, MAX_WINDOW_SECS, value
            )));
        }
        if cb.max_consecutive_losses == 0 {
            return Err(SettingsError::Invalid(
                "circuit_breaker.max_consecutive_losses must be positive".to_string(),
            ));
        }

        let cal = &self.calibration;
        if !(-1.0..=1.0).contains(&cal.default_correlation) {
            return Err(SettingsError::Invalid(format!(
                "calibration.default_correlation must be in [-1, 1], got {}",
                cal.default_correlation
            )));
        }
        if !(cal.kelly_multiplier > 0.0 && cal.kelly_multiplier <= 1.0) {
            return Err(SettingsError::Invalid(format!(
                "calibration.kelly_multiplier must be in (0, 1], got {}",
                cal.kelly_multiplier
            )));
        }
        if cal.max_iterations == 0 || !(cal.tolerance > 0.0) {
            return Err(SettingsError::Invalid(
                "calibration.max_iterations and calibration.tolerance must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Default scenarios with this configuration's overrides applied
    pub fn scenario_catalog(&self) -> Result<ScenarioCatalog, SimulationError> {
        ScenarioCatalog::from_overrides(&self.scenario_overrides)
    }
}
