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
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationHandle;
use crate::portfolio::Portfolio;
use crate::risk_metrics::{self, MetricsError, RiskMetrics};
use crate::scenario::{Scenario, ScenarioType, Severity};
use crate::simulator::{
    scenario_seed, MonteCarloConfig, MonteCarloSimulator, ScenarioSimulator, SimulationError,
    SimulationResult,
};
use crate::telemetry;

/// Impact above which a scenario is considered severe
pub const SEVERE_IMPACT: f64 = 0.5;

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per scenario in milliseconds
    pub scenario_timeout_ms: u64,

    /// Scenarios simulated at once, 0 for no limit
    pub max_parallel_scenarios: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scenario_timeout_ms: 30_000, // 30 seconds per scenario
            max_parallel_scenarios: 0,   // Unbounded; rayon bounds CPU use
        }
    }
}

/// Urgency of a recommended action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Target completion window
    pub fn timeline(&self) -> &'static str {
        match self {
            Priority::Critical => "24-48 hours",
            Priority::High => "1 week",
            Priority::Medium => "2 weeks",
            Priority::Low => "1 month",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", label)
    }
}

/// A recommended risk action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
}

impl Recommendation {
    fn new(priority: Priority, action: impl Into<String>) -> Self {
        Self {
            priority,
            action: action.into(),
        }
    }
}

/// Overall risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskTier {
    /// Classify a 0-100 risk score
    pub fn from_score(score: f64) -> Self {
        if score > 70.0 {
            RiskTier::Critical
        } else if score > 50.0 {
            RiskTier::High
        } else if score > 30.0 {
            RiskTier::Moderate
        } else {
            RiskTier::Low
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskTier::Low => "LOW",
            RiskTier::Moderate => "MODERATE",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        };
        write!(f, "{}", label)
    }
}

/// Why a scenario produced no metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ScenarioConfig,
    InvalidPortfolio,
    InsufficientTrials,
    Timeout,
    Cancelled,
    Panicked,
}

impl From<&SimulationError> for FailureKind {
    fn from(err: &SimulationError) -> Self {
        match err {
            SimulationError::ScenarioConfig(_) => FailureKind::ScenarioConfig,
            SimulationError::InvalidPortfolio(_) => FailureKind::InvalidPortfolio,
            SimulationError::InsufficientTrials { .. } => FailureKind::InsufficientTrials,
            SimulationError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Result of one scenario within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Completed {
        metrics: RiskMetrics,
        recommendations: Vec<Recommendation>,
    },
    /// Simulation ran but the metrics could not be computed
    Inconclusive { reason: String },
    Failed { kind: FailureKind, reason: String },
}

/// One scenario entry in a stress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub scenario_type: ScenarioType,
    pub severity: Severity,
    pub probability: f64,
    pub seed: u64,
    pub elapsed_ms: u64,
    pub outcome: ScenarioOutcome,
}

impl ScenarioReport {
    pub fn metrics(&self) -> Option<&RiskMetrics> {
        match &self.outcome {
            ScenarioOutcome::Completed { metrics, .. } => Some(metrics),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.metrics().is_some()
    }
}

/// Cross-scenario aggregates computed from completed scenarios only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub worst_case_impact: f64,
    pub average_impact: f64,
    pub max_drawdown: f64,
    pub highest_var: f64,
    pub scenarios_above_half_impact: usize,
    pub completed: usize,
    pub not_completed: usize,
    /// Probability and severity weighted impact, 0-100
    pub overall_risk_score: f64,
}

/// Output of a stress-test batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub base_seed: u64,
    pub portfolio_value: f64,
    pub elapsed_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
    pub aggregate: AggregateMetrics,
    pub risk_tier: RiskTier,
    pub recommendations: Vec<Recommendation>,
    /// True when any scenario failed, timed out or was inconclusive
    pub partial: bool,
    /// True when cancellation was requested while the batch ran
    pub cancelled: bool,
}

impl StressReport {
    pub fn completed(&self) -> impl Iterator<Item = (&ScenarioReport, &RiskMetrics)> {
        self.scenarios
            .iter()
            .filter_map(|entry| entry.metrics().map(|metrics| (entry, metrics)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|entry| !entry.is_completed())
    }
}

/// Weighted risk score on a 0-100 scale. Each entry is
/// (probability, severity, impact); entries with no metrics must be left out.
pub fn overall_risk_score(entries: &[(f64, Severity, f64)]) -> f64 {
    let (weighted, maximum) = entries
        .iter()
        .fold((0.0, 0.0), |(weighted, maximum), (probability, severity, impact)| {
            let weight = probability * severity.weight();
            (weighted + weight * impact, maximum + weight)
        });

    if maximum > 0.0 {
        (weighted / maximum * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Recommendations for a single completed scenario
pub fn scenario_recommendations(
    scenario_type: ScenarioType,
    metrics: &RiskMetrics,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if metrics.portfolio_impact > SEVERE_IMPACT {
        recommendations.push(Recommendation::new(
            Priority::Critical,
            format!("Reduce exposure to {} risk immediately", scenario_type),
        ));
    } else if metrics.portfolio_impact > 0.25 {
        recommendations.push(Recommendation::new(
            Priority::High,
            format!("Add hedging against {} scenarios", scenario_type),
        ));
    }

    if metrics.max_drawdown > 0.7 {
        recommendations.push(Recommendation::new(
            Priority::High,
            format!(
                "Worst-case drawdown of {:.1}% exceeds tolerance; tighten stop-losses",
                metrics.max_drawdown * 100.0
            ),
        ));
    }

    if metrics.survival_probability < 0.5 {
        recommendations.push(Recommendation::new(
            Priority::Critical,
            format!(
                "Survival probability of {:.1}% is below 50%; prepare emergency protocols",
                metrics.survival_probability * 100.0
            ),
        ));
    }

    let specific: &[&str] = match scenario_type {
        ScenarioType::FlashCrash => &[
            "Enable circuit breakers for rapid price moves",
            "Diversify into less correlated assets",
        ],
        ScenarioType::FeeSpike => &[
            "Route execution through layer-2 networks during fee spikes",
            "Set fee alerts and batch non-urgent transactions",
        ],
        ScenarioType::VenueOutage => &[
            "Maintain funded accounts on multiple venues",
            "Prepare manual override procedures for stuck orders",
        ],
        ScenarioType::LiquidityCrisis => &[
            "Monitor protocol health and locked value",
            "Cap exposure per protocol",
        ],
        ScenarioType::RegulatoryShock => &[
            "Review compliance posture per jurisdiction",
            "Prepare jurisdictional contingency plans",
        ],
        ScenarioType::Generic => &[],
    };
    recommendations.extend(
        specific
            .iter()
            .map(|action| Recommendation::new(Priority::Medium, *action)),
    );

    if recommendations.is_empty() {
        recommendations.push(Recommendation::new(
            Priority::Low,
            format!("{} risk is manageable; continue routine monitoring", scenario_type),
        ));
    }

    recommendations
}

/// Batch-level recommendations from the tier and aggregates
pub fn overall_recommendations(tier: RiskTier, aggregate: &AggregateMetrics) -> Vec<Recommendation> {
    let mut recommendations = match tier {
        RiskTier::Critical => vec![
            Recommendation::new(Priority::Critical, "Reduce risk immediately"),
            Recommendation::new(Priority::Critical, "Consider halting high-risk strategies"),
            Recommendation::new(Priority::High, "Increase cash reserves"),
        ],
        RiskTier::High => vec![
            Recommendation::new(Priority::High, "Reduce position sizes"),
            Recommendation::new(Priority::High, "Add hedging across the book"),
            Recommendation::new(Priority::Medium, "Review risk limits"),
        ],
        RiskTier::Moderate => vec![
            Recommendation::new(Priority::Medium, "Monitor risk metrics closely"),
            Recommendation::new(Priority::Low, "Consider gradual risk reduction"),
        ],
        RiskTier::Low => vec![Recommendation::new(
            Priority::Low,
            "Maintain current risk management practices",
        )],
    };

    if aggregate.worst_case_impact > 0.8 {
        recommendations.push(Recommendation::new(
            Priority::Critical,
            "Prepare a business continuity plan for extreme scenarios",
        ));
    }
    if aggregate.scenarios_above_half_impact > 2 {
        recommendations.push(Recommendation::new(
            Priority::High,
            "Diversify risk exposure across strategies and venues",
        ));
    }

    recommendations
}

/// Runs scenario batches and aggregates their results
pub struct StressTestOrchestrator {
    simulator: Arc<dyn ScenarioSimulator>,
    monte_carlo: MonteCarloConfig,
    config: OrchestratorConfig,
}

impl StressTestOrchestrator {
    pub fn new(monte_carlo: MonteCarloConfig, config: OrchestratorConfig) -> Self {
        let simulator = Arc::new(MonteCarloSimulator::new(monte_carlo.clone()));
        Self::with_simulator(simulator, monte_carlo, config)
    }

    pub fn with_simulator(
        simulator: Arc<dyn ScenarioSimulator>,
        monte_carlo: MonteCarloConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            simulator,
            monte_carlo,
            config,
        }
    }

    pub fn monte_carlo(&self) -> &MonteCarloConfig {
        &self.monte_carlo
    }

    /// Simulate every scenario against the portfolio
    pub async fn run(&self, scenarios: &[Scenario], portfolio: &Portfolio) -> SimulationResult<StressReport> {
        self.run_with_cancel(scenarios, portfolio, &CancellationHandle::new())
            .await
    }

    /// Like [`run`](Self::run), stopping early when `cancel` fires
    pub async fn run_with_cancel(
        &self,
        scenarios: &[Scenario],
        portfolio: &Portfolio,
        cancel: &CancellationHandle,
    ) -> SimulationResult<StressReport> {
        let base_seed = self.monte_carlo.seed.unwrap_or_else(rand::random);
        self.run_seeded(scenarios, portfolio, base_seed, cancel).await
    }

    async fn run_seeded(
        &self,
        scenarios: &[Scenario],
        portfolio: &Portfolio,
        base_seed: u64,
        cancel: &CancellationHandle,
    ) -> SimulationResult<StressReport> {
        portfolio.validate()?;

        let started = Instant::now();
        info!(
            "Starting stress test of {} scenarios against portfolio value {:.2} (seed {})",
            scenarios.len(),
            portfolio.total_value,
            base_seed
        );

        let timeout = Duration::from_millis(self.config.scenario_timeout_ms.max(1));
        let limiter = match self.config.max_parallel_scenarios {
            0 => None,
            permits => Some(Arc::new(Semaphore::new(permits))),
        };
        let portfolio = Arc::new(portfolio.clone());
        let mut tasks = JoinSet::new();

        for (index, scenario) in scenarios.iter().cloned().enumerate() {
            let simulator = Arc::clone(&self.simulator);
            let portfolio = Arc::clone(&portfolio);
            let limiter = limiter.clone();
            let scenario_cancel = cancel.child();
            let trials = self.monte_carlo.trials;
            let confidence = self.monte_carlo.confidence;
            let seed = scenario_seed(base_seed, &scenario.name);

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let scenario_started = Instant::now();

                let worker_cancel = scenario_cancel.clone();
                let worker_scenario = scenario.clone();
                let work = tokio::task::spawn_blocking(move || {
                    let run = simulator.simulate(&worker_scenario, &portfolio, trials, seed, &worker_cancel)?;
                    Ok::<_, SimulationError>(risk_metrics::reduce(&run, confidence))
                });

                let outcome = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(Ok(Ok(metrics)))) => {
                        let recommendations = scenario_recommendations(scenario.scenario_type(), &metrics);
                        ScenarioOutcome::Completed {
                            metrics,
                            recommendations,
                        }
                    }
                    Ok(Ok(Ok(Err(MetricsError::InsufficientData(reason))))) => {
                        ScenarioOutcome::Inconclusive { reason }
                    }
                    Ok(Ok(Ok(Err(err)))) => ScenarioOutcome::Inconclusive {
                        reason: err.to_string(),
                    },
                    Ok(Ok(Err(err))) => ScenarioOutcome::Failed {
                        kind: FailureKind::from(&err),
                        reason: err.to_string(),
                    },
                    Ok(Err(join_err)) => ScenarioOutcome::Failed {
                        kind: FailureKind::Panicked,
                        reason: join_err.to_string(),
                    },
                    Err(_) => {
                        scenario_cancel.cancel();
                        ScenarioOutcome::Failed {
                            kind: FailureKind::Timeout,
                            reason: format!("exceeded {} ms", timeout.as_millis()),
                        }
                    }
                };

                let report = ScenarioReport {
                    name: scenario.name.clone(),
                    scenario_type: scenario.scenario_type(),
                    severity: scenario.severity,
                    probability: scenario.probability,
                    seed,
                    elapsed_ms: scenario_started.elapsed().as_millis() as u64,
                    outcome,
                };
                (index, report)
            });
        }

        let mut slots: Vec<Option<ScenarioReport>> = vec![None; scenarios.len()];
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Stress test cancelled; abandoning unfinished scenarios");
                    cancelled = true;
                    collect_after_abort(&mut tasks, &mut slots).await;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, report))) => {
                        debug!("Scenario {} finished in {} ms", report.name, report.elapsed_ms);
                        slots[index] = Some(report);
                    }
                    Some(Err(err)) => error!("Scenario task terminated abnormally: {}", err),
                    None => break,
                }
            }
        }
        cancelled = cancelled || cancel.is_cancelled();

        let entries: Vec<ScenarioReport> = scenarios
            .iter()
            .zip(slots)
            .map(|(scenario, slot)| {
                slot.unwrap_or_else(|| {
                    let (kind, reason) = if cancelled {
                        (FailureKind::Cancelled, "batch cancelled".to_string())
                    } else {
                        (FailureKind::Panicked, "scenario task terminated".to_string())
                    };
                    ScenarioReport {
                        name: scenario.name.clone(),
                        scenario_type: scenario.scenario_type(),
                        severity: scenario.severity,
                        probability: scenario.probability,
                        seed: scenario_seed(base_seed, &scenario.name),
                        elapsed_ms: 0,
                        outcome: ScenarioOutcome::Failed { kind, reason },
                    }
                })
            })
            .collect();

        for entry in &entries {
            let status = match &entry.outcome {
                ScenarioOutcome::Completed { .. } => "completed",
                ScenarioOutcome::Inconclusive { .. } => "inconclusive",
                ScenarioOutcome::Failed { .. } => "failed",
            };
            counter!(telemetry::SCENARIOS_TOTAL, 1, "status" => status);
            if let ScenarioOutcome::Failed { kind, reason } = &entry.outcome {
                warn!("Scenario {} failed ({:?}): {}", entry.name, kind, reason);
            }
        }

        let aggregate = aggregate(&entries);
        let risk_tier = RiskTier::from_score(aggregate.overall_risk_score);
        let recommendations = overall_recommendations(risk_tier, &aggregate);
        let partial = aggregate.not_completed > 0;

        gauge!(telemetry::RISK_SCORE, aggregate.overall_risk_score);
        info!(
            "Stress test complete: score {:.1} ({}), {} of {} scenarios completed",
            aggregate.overall_risk_score,
            risk_tier,
            aggregate.completed,
            entries.len()
        );

        Ok(StressReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            base_seed,
            portfolio_value: portfolio.total_value,
            elapsed_ms: started.elapsed().as_millis() as u64,
            scenarios: entries,
            aggregate,
            risk_tier,
            recommendations,
            partial,
            cancelled,
        })
    }

    /// Re-run the batch while sweeping one portfolio parameter.
    /// All points share one base seed so differences come from the parameter.
    pub async fn sensitivity(
        &self,
        scenarios: &[Scenario],
        portfolio: &Portfolio,
        parameter: SensitivityParameter,
        range: (f64, f64),
        steps: usize,
    ) -> SimulationResult<SensitivityReport> {
        self.sensitivity_with_cancel(scenarios, portfolio, parameter, range, steps, &CancellationHandle::new())
            .await
    }

    /// Like [`sensitivity`](Self::sensitivity), stopping at the first point
    /// interrupted by `cancel`. Only fully computed points are reported.
    pub async fn sensitivity_with_cancel(
        &self,
        scenarios: &[Scenario],
        portfolio: &Portfolio,
        parameter: SensitivityParameter,
        range: (f64, f64),
        steps: usize,
        cancel: &CancellationHandle,
    ) -> SimulationResult<SensitivityReport> {
        let (start, end) = range;
        if !start.is_finite() || !end.is_finite() {
            return Err(SimulationError::InvalidPortfolio(format!(
                "sensitivity range {}..{} is not finite",
                start, end
            )));
        }

        let base_seed = self.monte_carlo.seed.unwrap_or_else(rand::random);
        let mut points = Vec::with_capacity(steps.max(1));
        let mut cancelled = false;

        for value in linspace(start, end, steps) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let mut adjusted = portfolio.clone();
            parameter.apply(&mut adjusted, value);
            let report = self.run_seeded(scenarios, &adjusted, base_seed, cancel).await?;
            if report.cancelled {
                warn!("Sensitivity sweep cancelled at {} = {}", parameter, value);
                cancelled = true;
                break;
            }

            points.push(SensitivityPoint {
                value,
                risk_score: report.aggregate.overall_risk_score,
                risk_tier: report.risk_tier,
                worst_case_impact: report.aggregate.worst_case_impact,
            });
        }

        let scores: Vec<f64> = points.iter().map(|p| p.risk_score).collect();
        let sensitivity_score = coefficient_of_variation(&scores);
        info!(
            "Sensitivity of {} over {} points: {:.3}",
            parameter,
            points.len(),
            sensitivity_score
        );

        Ok(SensitivityReport {
            parameter,
            points,
            sensitivity_score,
            cancelled,
        })
    }
}

/// Abort unfinished scenario tasks, keeping reports of those that already finished
async fn collect_after_abort(
    tasks: &mut JoinSet<(usize, ScenarioReport)>,
    slots: &mut [Option<ScenarioReport>],
) {
    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        if let Ok((index, report)) = joined {
            debug!("Scenario {} finished before cancellation", report.name);
            slots[index] = Some(report);
        }
    }
}

/// Create a stress test orchestrator backed by the Monte Carlo simulator
pub fn create_stress_orchestrator(
    monte_carlo: MonteCarloConfig,
    config: OrchestratorConfig,
) -> Arc<StressTestOrchestrator> {
    Arc::new(StressTestOrchestrator::new(monte_carlo, config))
}

fn aggregate(entries: &[ScenarioReport]) -> AggregateMetrics {
    let completed: Vec<(&ScenarioReport, &RiskMetrics)> = entries
        .iter()
        .filter_map(|entry| entry.metrics().map(|metrics| (entry, metrics)))
        .collect();
    let not_completed = entries.len() - completed.len();

    if completed.is_empty() {
        return AggregateMetrics {
            not_completed,
            ..Default::default()
        };
    }

    let impacts: Vec<f64> = completed.iter().map(|(_, m)| m.portfolio_impact).collect();
    let weighted: Vec<(f64, Severity, f64)> = completed
        .iter()
        .map(|(entry, m)| (entry.probability, entry.severity, m.portfolio_impact))
        .collect();

    AggregateMetrics {
        worst_case_impact: impacts.iter().copied().fold(0.0, f64::max),
        average_impact: impacts.iter().sum::<f64>() / impacts.len() as f64,
        max_drawdown: completed.iter().map(|(_, m)| m.max_drawdown).fold(0.0, f64::max),
        highest_var: completed.iter().map(|(_, m)| m.var).fold(0.0, f64::max),
        scenarios_above_half_impact: impacts.iter().filter(|i| **i > SEVERE_IMPACT).count(),
        completed: completed.len(),
        not_completed,
        overall_risk_score: overall_risk_score(&weighted),
    }
}

/// Portfolio field varied by a sensitivity sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityParameter {
    TotalValue,
    AvgProfitPerTrade,
    AvgTradeSize,
    DailyVolume,
    AvgPositionSize,
    LpPositionsValue,
    AnnualRevenue,
    ProfitMargin,
}

impl SensitivityParameter {
    pub const ALL: [SensitivityParameter; 8] = [
        SensitivityParameter::TotalValue,
        SensitivityParameter::AvgProfitPerTrade,
        SensitivityParameter::AvgTradeSize,
        SensitivityParameter::DailyVolume,
        SensitivityParameter::AvgPositionSize,
        SensitivityParameter::LpPositionsValue,
        SensitivityParameter::AnnualRevenue,
        SensitivityParameter::ProfitMargin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SensitivityParameter::TotalValue => "total_value",
            SensitivityParameter::AvgProfitPerTrade => "avg_profit_per_trade",
            SensitivityParameter::AvgTradeSize => "avg_trade_size",
            SensitivityParameter::DailyVolume => "daily_volume",
            SensitivityParameter::AvgPositionSize => "avg_position_size",
            SensitivityParameter::LpPositionsValue => "lp_positions_value",
            SensitivityParameter::AnnualRevenue => "annual_revenue",
            SensitivityParameter::ProfitMargin => "profit_margin",
        }
    }

    pub fn apply(&self, portfolio: &mut Portfolio, value: f64) {
        let profile = &mut portfolio.profile;
        match self {
            SensitivityParameter::TotalValue => portfolio.total_value = value,
            SensitivityParameter::AvgProfitPerTrade => profile.avg_profit_per_trade = value,
            SensitivityParameter::AvgTradeSize => profile.avg_trade_size = value,
            SensitivityParameter::DailyVolume => profile.daily_volume = value,
            SensitivityParameter::AvgPositionSize => profile.avg_position_size = value,
            SensitivityParameter::LpPositionsValue => profile.lp_positions_value = value,
            SensitivityParameter::AnnualRevenue => profile.annual_revenue = value,
            SensitivityParameter::ProfitMargin => profile.profit_margin = value,
        }
    }
}

impl fmt::Display for SensitivityParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SensitivityParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        SensitivityParameter::ALL
            .iter()
            .copied()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| format!("unknown sensitivity parameter: {}", s))
    }
}

/// One point of a sensitivity sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub value: f64,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub worst_case_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub parameter: SensitivityParameter,
    pub points: Vec<SensitivityPoint>,
    /// Coefficient of variation of the risk score across the sweep
    pub sensitivity_score: f64,
    /// The sweep stopped early; `points` covers only the finished values
    #[serde(default)]
    pub cancelled: bool,
}

fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 | 1 => vec![start],
        n => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean.abs()
}
