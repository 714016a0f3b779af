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

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::portfolio::OperatingProfile;
use crate::simulator::{SimulationError, SimulationResult};

/// Gwei to native token conversion
const GWEI: f64 = 1e-9;

/// Severity of a stress scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Severity {
    /// Weight of the severity in the overall risk score
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
            Severity::Extreme => 5.0,
        }
    }

    /// Mean fractional loss used by the generic payoff
    pub fn generic_impact(&self) -> f64 {
        match self {
            Severity::Low => 0.1,
            Severity::Medium => 0.25,
            Severity::High => 0.5,
            Severity::Extreme => 0.75,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Extreme => "extreme",
        };
        write!(f, "{}", label)
    }
}

/// Discriminant of a scenario kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    FlashCrash,
    FeeSpike,
    VenueOutage,
    LiquidityCrisis,
    RegulatoryShock,
    Generic,
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScenarioType::FlashCrash => "flash_crash",
            ScenarioType::FeeSpike => "fee_spike",
            ScenarioType::VenueOutage => "venue_outage",
            ScenarioType::LiquidityCrisis => "liquidity_crisis",
            ScenarioType::RegulatoryShock => "regulatory_shock",
            ScenarioType::Generic => "generic",
        };
        write!(f, "{}", label)
    }
}

/// Market-wide crash with correlated asset shocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashCrashParams {
    /// Standard deviation of the per-asset shock
    pub volatility_spike: f64,

    /// Fraction of market depth that disappears
    pub liquidity_drop: f64,

    /// Scale applied to the mean correlated shock
    pub price_decline: f64,

    /// Expected recovery time
    pub recovery_time_hours: f64,

    /// Pairwise asset correlation while the crash lasts
    pub crash_correlation: f64,
}

impl Default for FlashCrashParams {
    fn default() -> Self {
        Self {
            volatility_spike: 0.15,
            liquidity_drop: 0.8,
            price_decline: 0.35,
            recovery_time_hours: 6.0,
            crash_correlation: 0.8,
        }
    }
}

impl FlashCrashParams {
    /// Terminal value as a multiple of the starting value, given the mean
    /// of one vector of correlated shocks
    pub fn value_multiplier(&self, mean_shock: f64) -> f64 {
        let market_return = mean_shock * self.price_decline;
        let execution_penalty = (1.0 - self.liquidity_drop) * 0.5;
        1.0 + market_return - execution_penalty
    }
}

/// Network fee spike that inflates execution costs and fails transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSpikeParams {
    /// Fee level during the spike, in gwei
    pub gas_price_gwei: f64,

    /// Normal fee level, in gwei
    pub base_gas_price_gwei: f64,

    /// Gas units consumed by one transaction
    pub gas_units_per_tx: f64,

    /// Price of the fee token in currency units
    pub native_token_price: f64,

    /// Transactions submitted during the window
    pub transactions: u64,

    /// Network utilisation during the spike
    pub network_congestion: f64,

    /// Probability that a single transaction fails
    pub failed_transaction_rate: f64,

    /// How long the spike lasts
    pub duration_hours: f64,
}

impl Default for FeeSpikeParams {
    fn default() -> Self {
        Self {
            gas_price_gwei: 500.0,
            base_gas_price_gwei: 30.0,
            gas_units_per_tx: 500_000.0,
            native_token_price: 1_800.0,
            transactions: 10,
            network_congestion: 0.9,
            failed_transaction_rate: 0.3,
            duration_hours: 24.0,
        }
    }
}

impl FeeSpikeParams {
    /// Extra fee paid per transaction, in currency units
    pub fn fee_increase_per_tx(&self) -> f64 {
        (self.gas_price_gwei - self.base_gas_price_gwei) * self.gas_units_per_tx * GWEI
            * self.native_token_price
    }

    /// Loss in currency units when `failed` transactions did not land
    pub fn impact(&self, failed: u64, profile: &OperatingProfile) -> f64 {
        let fee_cost = self.fee_increase_per_tx() * self.transactions as f64;
        let missed_profit = profile.avg_profit_per_trade * failed as f64;
        fee_cost + missed_profit
    }
}

/// Trading venue outage that concentrates flow on the remaining venues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueOutageParams {
    /// Venues still accepting orders
    pub available_venues: u32,

    /// Venues normally available
    pub baseline_venues: u32,

    /// Slippage in normal conditions
    pub base_slippage: f64,

    /// Additional slippage during the outage
    pub slippage_increase: f64,

    /// Share of daily volume lost to delayed withdrawals
    pub opportunity_cost_rate: f64,

    /// Expected withdrawal delay
    pub withdrawal_delay_hours: f64,

    /// Assets whose markets are affected
    pub affected_assets: Vec<String>,
}

impl Default for VenueOutageParams {
    fn default() -> Self {
        Self {
            available_venues: 1,
            baseline_venues: 5,
            base_slippage: 0.002,
            slippage_increase: 0.1,
            opportunity_cost_rate: 0.001,
            withdrawal_delay_hours: 12.0,
            affected_assets: vec!["ETH".to_string(), "BTC".to_string(), "USDC".to_string()],
        }
    }
}

impl VenueOutageParams {
    /// Expected slippage during the outage
    pub fn crisis_slippage(&self) -> f64 {
        self.base_slippage + self.slippage_increase
    }

    /// Slippage amplification from the reduced venue count
    pub fn venue_penalty(&self) -> f64 {
        self.baseline_venues.max(1) as f64 / self.available_venues.max(1) as f64
    }

    /// Loss in currency units for one realised slippage draw
    pub fn impact(&self, slippage: f64, profile: &OperatingProfile) -> f64 {
        let slippage_cost = profile.avg_trade_size * slippage * self.venue_penalty();
        let delay_cost = profile.daily_volume * self.opportunity_cost_rate;
        slippage_cost + delay_cost
    }
}

/// DeFi liquidity crisis with protocol failures and yield compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityCrisisParams {
    /// Fraction of locked value withdrawn
    pub tvl_drop: f64,

    /// Relative reduction of the baseline yield
    pub yield_compression: f64,

    /// Baseline yield on liquidity-provider positions
    pub base_yield: f64,

    /// Baseline impermanent loss on liquidity-provider positions
    pub base_impermanent_loss: f64,

    /// Multiplier on impermanent loss during the crisis
    pub impermanent_loss_multiplier: f64,

    /// Expected number of protocol failures
    pub expected_protocol_failures: f64,

    /// Fraction of a position lost per protocol failure
    pub loss_per_failure: f64,
}

impl Default for LiquidityCrisisParams {
    fn default() -> Self {
        Self {
            tvl_drop: 0.6,
            yield_compression: 0.02,
            base_yield: 0.05,
            base_impermanent_loss: 0.02,
            impermanent_loss_multiplier: 3.0,
            expected_protocol_failures: 2.0,
            loss_per_failure: 0.1,
        }
    }
}

impl LiquidityCrisisParams {
    /// Loss in currency units when `failures` protocols fail
    pub fn impact(&self, failures: u64, profile: &OperatingProfile) -> f64 {
        let failure_loss = failures as f64 * profile.avg_position_size * self.loss_per_failure;
        let yield_loss = self.base_yield * self.yield_compression * profile.lp_positions_value;
        let impermanent_loss =
            profile.lp_positions_value * self.base_impermanent_loss * self.impermanent_loss_multiplier;
        failure_loss + yield_loss + impermanent_loss
    }
}

/// Regulatory action raising compliance costs and depressing volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatoryShockParams {
    /// Jurisdictions imposing restrictions
    pub jurisdiction_restrictions: u32,

    /// Multiplier on the baseline compliance spend
    pub compliance_costs_multiplier: f64,

    /// Baseline compliance spend as a share of annual revenue
    pub base_compliance_rate: f64,

    /// Expected drop in traded volume
    pub market_confidence_drop: f64,

    /// Legal fees in currency units
    pub legal_fees: f64,
}

impl Default for RegulatoryShockParams {
    fn default() -> Self {
        Self {
            jurisdiction_restrictions: 3,
            compliance_costs_multiplier: 2.5,
            base_compliance_rate: 0.05,
            market_confidence_drop: 0.4,
            legal_fees: 5_000_000.0,
        }
    }
}

impl RegulatoryShockParams {
    /// Loss in currency units for one draw of the legal cost multiplier and
    /// the realised volume reduction
    pub fn impact(
        &self,
        legal_multiplier: f64,
        volume_reduction: f64,
        profile: &OperatingProfile,
    ) -> f64 {
        let compliance_cost =
            self.compliance_costs_multiplier * profile.annual_revenue * self.base_compliance_rate;
        let lost_margin = profile.daily_volume * volume_reduction * profile.profit_margin;
        compliance_cost * legal_multiplier + self.legal_fees + lost_margin
    }
}

/// Typed parameters of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioKind {
    FlashCrash(FlashCrashParams),
    FeeSpike(FeeSpikeParams),
    VenueOutage(VenueOutageParams),
    LiquidityCrisis(LiquidityCrisisParams),
    RegulatoryShock(RegulatoryShockParams),
    /// Severity-driven loss with no dedicated payoff
    Generic,
}

impl ScenarioKind {
    pub fn scenario_type(&self) -> ScenarioType {
        match self {
            ScenarioKind::FlashCrash(_) => ScenarioType::FlashCrash,
            ScenarioKind::FeeSpike(_) => ScenarioType::FeeSpike,
            ScenarioKind::VenueOutage(_) => ScenarioType::VenueOutage,
            ScenarioKind::LiquidityCrisis(_) => ScenarioType::LiquidityCrisis,
            ScenarioKind::RegulatoryShock(_) => ScenarioType::RegulatoryShock,
            ScenarioKind::Generic => ScenarioType::Generic,
        }
    }
}

/// A named, parameterized adverse-market description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name within the catalog
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Scenario parameters
    pub kind: ScenarioKind,

    /// Probability of the scenario occurring, in [0, 1]
    pub probability: f64,

    /// Severity used to weight the scenario in the risk score
    pub severity: Severity,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ScenarioKind,
        probability: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            probability,
            severity,
        }
    }

    pub fn scenario_type(&self) -> ScenarioType {
        self.kind.scenario_type()
    }

    /// Check the fields shared by every scenario kind
    pub fn validate(&self) -> SimulationResult<()> {
        if self.name.trim().is_empty() {
            return Err(SimulationError::ScenarioConfig(
                "scenario name must not be empty".to_string(),
            ));
        }
        if !self.probability.is_finite() || !(0.0..=1.0).contains(&self.probability) {
            return Err(SimulationError::ScenarioConfig(format!(
                "scenario {} has probability {} outside [0, 1]",
                self.name, self.probability
            )));
        }
        Ok(())
    }
}

/// Partial update applied to a catalog entry at load time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOverride {
    /// Name of the scenario to update or add
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub probability: Option<f64>,

    #[serde(default)]
    pub severity: Option<Severity>,

    /// Replacement parameters; must keep the scenario type
    #[serde(default)]
    pub kind: Option<ScenarioKind>,
}

/// Scenarios shipped with the engine
pub fn default_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "2020-style Flash Crash",
            "Sudden market-wide crash with correlated drawdowns and vanishing depth",
            ScenarioKind::FlashCrash(FlashCrashParams::default()),
            0.05,
            Severity::Extreme,
        ),
        Scenario::new(
            "Ethereum Gas Crisis",
            "Sustained fee spike with network congestion and failed transactions",
            ScenarioKind::FeeSpike(FeeSpikeParams::default()),
            0.15,
            Severity::High,
        ),
        Scenario::new(
            "Major Exchange Outage",
            "Loss of most trading venues with elevated slippage and withdrawal delays",
            ScenarioKind::VenueOutage(VenueOutageParams::default()),
            0.08,
            Severity::Medium,
        ),
        Scenario::new(
            "DeFi Liquidity Crisis",
            "Locked value flight, yield compression and protocol failures",
            ScenarioKind::LiquidityCrisis(LiquidityCrisisParams::default()),
            0.12,
            Severity::High,
        ),
        Scenario::new(
            "Regulatory Crackdown",
            "Multi-jurisdiction restrictions with legal and compliance costs",
            ScenarioKind::RegulatoryShock(RegulatoryShockParams::default()),
            0.03,
            Severity::Extreme,
        ),
    ]
}

/// Append-only registry of scenarios
#[derive(Debug, Default)]
pub struct ScenarioCatalog {
    scenarios: RwLock<Vec<Scenario>>,
}

impl ScenarioCatalog {
    /// Empty catalog
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the default scenarios
    pub fn with_defaults() -> Self {
        Self {
            scenarios: RwLock::new(default_scenarios()),
        }
    }

    /// Catalog preloaded with the defaults and patched by `overrides`
    pub fn from_overrides(overrides: &[ScenarioOverride]) -> SimulationResult<Self> {
        let mut scenarios = default_scenarios();

        for patch in overrides {
            match scenarios.iter_mut().find(|s| s.name == patch.name) {
                Some(existing) => {
                    apply_override(existing, patch)?;
                    debug!("Applied override to scenario {}", existing.name);
                }
                None => match (&patch.kind, patch.probability, patch.severity) {
                    (Some(kind), Some(probability), Some(severity)) => {
                        let scenario = Scenario::new(
                            patch.name.clone(),
                            patch.description.clone().unwrap_or_default(),
                            kind.clone(),
                            probability,
                            severity,
                        );
                        scenario.validate()?;
                        info!("Added scenario {} from configuration", scenario.name);
                        scenarios.push(scenario);
                    }
                    _ => warn!(
                        "Ignoring override for unknown scenario {}: kind, probability and severity are required to add it",
                        patch.name
                    ),
                },
            }
        }

        Ok(Self {
            scenarios: RwLock::new(scenarios),
        })
    }

    /// Append a scenario. Names are unique.
    pub fn register(&self, scenario: Scenario) -> SimulationResult<()> {
        scenario.validate()?;

        let mut scenarios = self.scenarios.write();
        if scenarios.iter().any(|s| s.name == scenario.name) {
            return Err(SimulationError::ScenarioConfig(format!(
                "scenario {} is already registered",
                scenario.name
            )));
        }

        info!("Registered scenario {} ({})", scenario.name, scenario.scenario_type());
        scenarios.push(scenario);
        Ok(())
    }

    /// Look up a scenario by name
    pub fn get(&self, name: &str) -> Option<Scenario> {
        self.scenarios.read().iter().find(|s| s.name == name).cloned()
    }

    /// Copy of every registered scenario, in registration order
    pub fn snapshot(&self) -> Vec<Scenario> {
        self.scenarios.read().clone()
    }

    pub fn len(&self) -> usize {
        self.scenarios.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.read().is_empty()
    }
}

fn apply_override(scenario: &mut Scenario, patch: &ScenarioOverride) -> SimulationResult<()> {
    if let Some(kind) = &patch.kind {
        if kind.scenario_type() != scenario.scenario_type() {
            return Err(SimulationError::ScenarioConfig(format!(
                "override for {} changes type from {} to {}",
                scenario.name,
                scenario.scenario_type(),
                kind.scenario_type()
            )));
        }
        scenario.kind = kind.clone();
    }
    if let Some(description) = &patch.description {
        scenario.description = description.clone();
    }
    if let Some(probability) = patch.probability {
        scenario.probability = probability;
    }
    if let Some(severity) = patch.severity {
        scenario.severity = severity;
    }
    scenario.validate()
}
