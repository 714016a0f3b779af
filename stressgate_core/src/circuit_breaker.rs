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

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::telemetry;

/// Errors related to circuit breaker control
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BreakerError {
    #[error("Breaker {kind} is cooling down for another {remaining_secs}s")]
    CooldownActive { kind: BreakerKind, remaining_secs: i64 },

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),
}

pub type BreakerResult<T> = Result<T, BreakerError>;

/// Longest cooldown or window the gate honours, one leap year in seconds
pub const MAX_WINDOW_SECS: u64 = 366 * 86_400;

/// Configuration for the trade gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Maximum daily loss as a fraction of reference capital
    pub max_daily_loss: f64,

    /// Maximum loss of a single trade as a fraction of reference capital
    pub max_single_loss: f64,

    /// Losing proposals in a row that trip the breaker
    pub max_consecutive_losses: u32,

    /// Execution cost ceiling, in the unit the caller quotes costs in
    pub max_execution_cost: f64,

    /// Minimum expected profit as a fraction of trade size
    pub min_profit_threshold: f64,

    /// Time before a tripped breaker may be reset, in seconds
    pub cooldown_secs: u64,

    /// Capital the loss limits are expressed against
    pub reference_capital: f64,

    /// Evaluated trades kept in history
    pub history_capacity: usize,

    /// Length of the daily P&L window, in seconds
    pub daily_window_secs: u64,

    /// Look-back of the trading metrics, in seconds
    pub metrics_window_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.05,        // 5% daily loss limit
            max_single_loss: 0.02,       // 2% per trade
            max_consecutive_losses: 5,   // 5 losers in a row
            max_execution_cost: 200.0,   // 200 gwei
            min_profit_threshold: 0.001, // 0.1% expected profit
            cooldown_secs: 300,          // 5 minute cooldown
            reference_capital: 100_000.0,
            history_capacity: 1_000,
            daily_window_secs: 86_400,   // 24 hours
            metrics_window_secs: 3_600,  // Last hour
        }
    }
}

/// Independent breakers guarding trade flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKind {
    DailyLoss,
    ConsecutiveLosses,
    CostCeiling,
    ProfitabilityFloor,
}

impl BreakerKind {
    pub const ALL: [BreakerKind; 4] = [
        BreakerKind::DailyLoss,
        BreakerKind::ConsecutiveLosses,
        BreakerKind::CostCeiling,
        BreakerKind::ProfitabilityFloor,
    ];
}

impl fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakerKind::DailyLoss => "daily_loss",
            BreakerKind::ConsecutiveLosses => "consecutive_losses",
            BreakerKind::CostCeiling => "cost_ceiling",
            BreakerKind::ProfitabilityFloor => "profitability_floor",
        };
        write!(f, "{}", label)
    }
}

/// Lifecycle status of a proposed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    #[default]
    Pending,
    Executed,
    Failed,
    Cancelled,
}

/// A trade awaiting a gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: String,

    /// Expected profit in currency units; negative for an expected loss
    pub expected_profit: f64,

    /// Expected profit as a fraction of trade size
    pub expected_profit_percentage: f64,

    /// Execution cost in the unit of `max_execution_cost`
    pub execution_cost: f64,

    #[serde(default)]
    pub status: TradeStatus,
}

/// Latch state of one breaker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub triggered: bool,
    pub last_trigger: Option<DateTime<Utc>>,
}

/// Mutable state of the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub breakers: BTreeMap<BreakerKind, BreakerState>,
    pub consecutive_losses: u32,
    /// P&L accumulated in the current daily window
    pub daily_pnl: f64,
    pub window_started_at: DateTime<Utc>,
}

impl CircuitBreakerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            breakers: BreakerKind::ALL
                .iter()
                .map(|kind| (*kind, BreakerState::default()))
                .collect(),
            consecutive_losses: 0,
            daily_pnl: 0.0,
            window_started_at: now,
        }
    }

    pub fn is_triggered(&self, kind: BreakerKind) -> bool {
        self.breakers.get(&kind).map_or(false, |b| b.triggered)
    }

    pub fn triggered(&self) -> Vec<BreakerKind> {
        self.breakers
            .iter()
            .filter(|(_, b)| b.triggered)
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn trigger(&mut self, kind: BreakerKind, now: DateTime<Utc>) {
        let breaker = self.breakers.entry(kind).or_default();
        breaker.triggered = true;
        breaker.last_trigger = Some(now);
    }

    fn clear(&mut self, kind: BreakerKind) {
        if let Some(breaker) = self.breakers.get_mut(&kind) {
            breaker.triggered = false;
        }
        if kind == BreakerKind::ConsecutiveLosses {
            self.consecutive_losses = 0;
        }
    }
}

/// Gate decision for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub trade_id: String,
    pub allowed: bool,
    /// Breakers denying the trade, whether newly tripped or already latched
    pub triggered_breakers: Vec<BreakerKind>,
    pub warnings: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerEventKind {
    Triggered,
    Reset,
    EmergencyStop,
    Resumed,
}

/// Breaker transition published to listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerEvent {
    pub kind: BreakerEventKind,
    pub breaker: Option<BreakerKind>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// An evaluated proposal kept for trading metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub expected_profit: f64,
    pub execution_cost: f64,
    pub status: TradeStatus,
    pub allowed: bool,
    pub realized_profit: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Metrics over settled trades in the recent window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingMetrics {
    pub window_secs: u64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub average_profit: f64,
    /// Peak-to-trough decline of cumulative P&L, as a fraction of reference capital
    pub max_drawdown: f64,
    /// Total profit per currency unit of drawdown
    pub risk_adjusted_return: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub kind: BreakerKind,
    pub triggered: bool,
    pub last_trigger: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: i64,
}

/// Snapshot of the gate for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStatus {
    pub healthy: bool,
    pub breakers: Vec<BreakerStatus>,
    pub consecutive_losses: u32,
    pub daily_pnl: f64,
    pub daily_loss_fraction: f64,
    pub trades_in_history: usize,
}

struct GateInner {
    state: CircuitBreakerState,
    history: VecDeque<TradeRecord>,
}

/// Stateful trade gate. Evaluations are serialized through a single lock.
pub struct CircuitBreakerGate {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<GateInner>,
    event_sender: Option<mpsc::Sender<BreakerEvent>>,
}

impl CircuitBreakerGate {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Mutex::new(GateInner {
                state: CircuitBreakerState::new(now),
                history: VecDeque::with_capacity(config.history_capacity.min(4_096)),
            }),
            config,
            clock,
            event_sender: None,
        }
    }

    /// Publish breaker transitions on `sender`
    pub fn with_event_sender(mut self, sender: mpsc::Sender<BreakerEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether `trade` may proceed. Every check runs so the verdict
    /// reports all violations, and breakers latch as a side effect.
    pub async fn evaluate(&self, trade: &TradeProposal) -> Verdict {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        self.roll_daily_window(&mut inner.state, now);

        let mut denied: Vec<BreakerKind> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut newly_triggered: Vec<(BreakerKind, String)> = Vec::new();

        let figures = [
            trade.expected_profit,
            trade.expected_profit_percentage,
            trade.execution_cost,
        ];
        if figures.iter().any(|v| !v.is_finite()) {
            warn!("Trade {} has non-finite figures, denying", trade.id);
            warnings.push("proposal contains non-finite figures".to_string());
            self.record(&mut inner, trade, now, false);
            counter!(telemetry::TRADES_EVALUATED, 1, "decision" => "denied");
            return Verdict {
                trade_id: trade.id.clone(),
                allowed: false,
                triggered_breakers: Vec::new(),
                warnings,
                evaluated_at: now,
            };
        }

        let state = &mut inner.state;
        let capital = self.config.reference_capital;

        // Daily loss
        let projected = (state.daily_pnl + trade.expected_profit) / capital;
        if state.is_triggered(BreakerKind::DailyLoss) {
            denied.push(BreakerKind::DailyLoss);
        } else if projected < -self.config.max_daily_loss {
            state.trigger(BreakerKind::DailyLoss, now);
            denied.push(BreakerKind::DailyLoss);
            newly_triggered.push((
                BreakerKind::DailyLoss,
                format!(
                    "projected daily loss {:.2}% exceeds {:.2}%",
                    -projected * 100.0,
                    self.config.max_daily_loss * 100.0
                ),
            ));
        }

        // Single trade loss denies without latching
        let single = trade.expected_profit / capital;
        let single_loss_exceeded = single < -self.config.max_single_loss;
        if single_loss_exceeded {
            warnings.push(format!(
                "expected loss {:.2}% exceeds single trade limit {:.2}%",
                -single * 100.0,
                self.config.max_single_loss * 100.0
            ));
        }

        // Consecutive losses
        if trade.expected_profit < 0.0 {
            state.consecutive_losses += 1;
        } else if trade.expected_profit > 0.0 {
            state.consecutive_losses = 0;
        }
        if state.is_triggered(BreakerKind::ConsecutiveLosses) {
            denied.push(BreakerKind::ConsecutiveLosses);
        } else if state.consecutive_losses >= self.config.max_consecutive_losses {
            state.trigger(BreakerKind::ConsecutiveLosses, now);
            denied.push(BreakerKind::ConsecutiveLosses);
            newly_triggered.push((
                BreakerKind::ConsecutiveLosses,
                format!("{} consecutive losing trades", state.consecutive_losses),
            ));
        }

        // Execution cost ceiling
        if state.is_triggered(BreakerKind::CostCeiling) {
            denied.push(BreakerKind::CostCeiling);
        } else if trade.execution_cost > self.config.max_execution_cost {
            state.trigger(BreakerKind::CostCeiling, now);
            denied.push(BreakerKind::CostCeiling);
            newly_triggered.push((
                BreakerKind::CostCeiling,
                format!(
                    "execution cost {:.2} exceeds ceiling {:.2}",
                    trade.execution_cost, self.config.max_execution_cost
                ),
            ));
        }

        // Profitability floor
        let floor = self.config.min_profit_threshold;
        if state.is_triggered(BreakerKind::ProfitabilityFloor) {
            denied.push(BreakerKind::ProfitabilityFloor);
        } else if trade.expected_profit_percentage < floor * 0.5 {
            state.trigger(BreakerKind::ProfitabilityFloor, now);
            denied.push(BreakerKind::ProfitabilityFloor);
            newly_triggered.push((
                BreakerKind::ProfitabilityFloor,
                format!(
                    "expected profit {:.4}% below half the floor of {:.4}%",
                    trade.expected_profit_percentage * 100.0,
                    floor * 100.0
                ),
            ));
        } else if trade.expected_profit_percentage < floor {
            warnings.push(format!(
                "expected profit {:.4}% below floor {:.4}%",
                trade.expected_profit_percentage * 100.0,
                floor * 100.0
            ));
        }

        let allowed = denied.is_empty() && !single_loss_exceeded;
        if allowed {
            state.daily_pnl += trade.expected_profit;
        }
        let daily_pnl = state.daily_pnl;
        self.record(&mut inner, trade, now, allowed);

        for (kind, message) in &newly_triggered {
            error!("Circuit breaker {} triggered: {}", kind, message);
            counter!(telemetry::BREAKER_TRIPS, 1, "breaker" => kind.to_string());
            self.publish(BreakerEventKind::Triggered, Some(*kind), now, message.clone());
        }
        for warning in &warnings {
            warn!("Trade {}: {}", trade.id, warning);
        }

        let decision = if allowed { "allowed" } else { "denied" };
        counter!(telemetry::TRADES_EVALUATED, 1, "decision" => decision);
        gauge!(telemetry::DAILY_PNL, daily_pnl);
        debug!("Trade {} {} (daily P&L {:.2})", trade.id, decision, daily_pnl);

        Verdict {
            trade_id: trade.id.clone(),
            allowed,
            triggered_breakers: denied,
            warnings,
            evaluated_at: now,
        }
    }

    /// Clear one breaker once its cooldown has elapsed. A breaker that is not
    /// triggered is left untouched.
    pub async fn reset(&self, kind: BreakerKind) -> BreakerResult<CircuitBreakerState> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        if !state.is_triggered(kind) {
            return Ok(state.clone());
        }

        if let Some(remaining) = self.cooldown_remaining(state, kind, now) {
            return Err(BreakerError::CooldownActive {
                kind,
                remaining_secs: remaining,
            });
        }

        state.clear(kind);
        info!("Circuit breaker {} reset", kind);
        self.publish(BreakerEventKind::Reset, Some(kind), now, format!("{} reset", kind));
        Ok(state.clone())
    }

    /// Reset every triggered breaker whose cooldown has elapsed
    pub async fn reset_expired(&self) -> Vec<BreakerKind> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        let expired: Vec<BreakerKind> = state
            .triggered()
            .into_iter()
            .filter(|kind| self.cooldown_remaining(state, *kind, now).is_none())
            .collect();
        for kind in &expired {
            state.clear(*kind);
            info!("Circuit breaker {} reset after cooldown", kind);
            self.publish(BreakerEventKind::Reset, Some(*kind), now, format!("{} reset", kind));
        }
        expired
    }

    /// Trip every breaker
    pub async fn emergency_stop(&self, reason: &str) -> CircuitBreakerState {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        for kind in BreakerKind::ALL {
            inner.state.trigger(kind, now);
        }
        error!("Emergency stop: {}", reason);
        counter!(telemetry::BREAKER_TRIPS, 1, "breaker" => "emergency_stop");
        self.publish(BreakerEventKind::EmergencyStop, None, now, reason.to_string());
        inner.state.clone()
    }

    /// Clear every triggered breaker regardless of cooldown. No-op when
    /// nothing is triggered.
    pub async fn resume(&self) -> CircuitBreakerState {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let triggered = inner.state.triggered();
        if triggered.is_empty() {
            return inner.state.clone();
        }

        for kind in &triggered {
            inner.state.clear(*kind);
        }
        warn!("Trading resumed manually; cleared {:?}", triggered);
        self.publish(BreakerEventKind::Resumed, None, now, "manual resume".to_string());
        inner.state.clone()
    }

    /// Apply the realized profit of an allowed trade to the daily P&L
    pub async fn record_settlement(&self, trade_id: &str, realized_profit: f64) -> BreakerResult<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .history
            .iter_mut()
            .rev()
            .find(|r| r.trade_id == trade_id)
            .ok_or_else(|| BreakerError::UnknownTrade(trade_id.to_string()))?;

        let previous = record.realized_profit.unwrap_or(record.expected_profit);
        let correction = if record.allowed { realized_profit - previous } else { 0.0 };
        record.realized_profit = Some(realized_profit);
        record.status = TradeStatus::Executed;

        inner.state.daily_pnl += correction;
        debug!(
            "Settled {} at {:.2} (daily P&L now {:.2})",
            trade_id, realized_profit, inner.state.daily_pnl
        );
        Ok(())
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.lock().await.state.clone()
    }

    pub async fn status(&self) -> GateStatus {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        let state = &inner.state;

        let breakers: Vec<BreakerStatus> = BreakerKind::ALL
            .iter()
            .map(|kind| {
                let breaker = state.breakers.get(kind).cloned().unwrap_or_default();
                BreakerStatus {
                    kind: *kind,
                    triggered: breaker.triggered,
                    last_trigger: breaker.last_trigger,
                    cooldown_remaining_secs: if breaker.triggered {
                        self.cooldown_remaining(state, *kind, now).unwrap_or(0)
                    } else {
                        0
                    },
                }
            })
            .collect();

        GateStatus {
            healthy: breakers.iter().all(|b| !b.triggered),
            breakers,
            consecutive_losses: state.consecutive_losses,
            daily_pnl: state.daily_pnl,
            daily_loss_fraction: (-state.daily_pnl / self.config.reference_capital).max(0.0),
            trades_in_history: inner.history.len(),
        }
    }

    /// Metrics over settled trades in the configured window
    pub async fn trading_metrics(&self) -> Option<TradingMetrics> {
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(window_duration(self.config.metrics_window_secs));
        let inner = self.inner.lock().await;

        let profits: Vec<f64> = inner
            .history
            .iter()
            .filter(|r| r.allowed && cutoff.map_or(true, |c| r.evaluated_at >= c))
            .filter_map(|r| r.realized_profit)
            .collect();
        if profits.is_empty() {
            return None;
        }

        let total_trades = profits.len();
        let winning_trades = profits.iter().filter(|p| **p > 0.0).count();
        let win_rate = winning_trades as f64 / total_trades as f64;
        let total_profit: f64 = profits.iter().sum();
        let average_profit = total_profit / total_trades as f64;

        let mut cumulative = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut worst = 0.0_f64;
        for profit in &profits {
            cumulative += profit;
            peak = peak.max(cumulative);
            worst = worst.max(peak - cumulative);
        }

        let risk_level = if win_rate < 0.4 || average_profit < 0.0 {
            RiskLevel::High
        } else if win_rate < 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Some(TradingMetrics {
            window_secs: self.config.metrics_window_secs,
            total_trades,
            winning_trades,
            win_rate,
            total_profit,
            average_profit,
            max_drawdown: worst / self.config.reference_capital,
            risk_adjusted_return: total_profit / (worst + 1e-3),
            risk_level,
        })
    }

    fn roll_daily_window(&self, state: &mut CircuitBreakerState, now: DateTime<Utc>) {
        let window = window_duration(self.config.daily_window_secs);
        if now - state.window_started_at >= window {
            info!(
                "Daily window rolled over; resetting daily P&L of {:.2}",
                state.daily_pnl
            );
            state.daily_pnl = 0.0;
            state.window_started_at = now;
        }
    }

    /// Whole seconds of cooldown left, rounded up, or `None` once it has
    /// fully elapsed
    fn cooldown_remaining(&self, state: &CircuitBreakerState, kind: BreakerKind, now: DateTime<Utc>) -> Option<i64> {
        let last = state.breakers.get(&kind).and_then(|b| b.last_trigger)?;
        let cooldown = window_duration(self.config.cooldown_secs);
        match last.checked_add_signed(cooldown) {
            Some(until) if now >= until => None,
            Some(until) => {
                let millis = (until - now).num_milliseconds();
                Some(((millis + 999) / 1000).max(1))
            }
            // Past the representable calendar; never expires
            None => Some(cooldown.num_seconds()),
        }
    }

    fn record(&self, inner: &mut GateInner, trade: &TradeProposal, now: DateTime<Utc>, allowed: bool) {
        if self.config.history_capacity == 0 {
            return;
        }
        while inner.history.len() >= self.config.history_capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(TradeRecord {
            trade_id: trade.id.clone(),
            evaluated_at: now,
            expected_profit: trade.expected_profit,
            execution_cost: trade.execution_cost,
            status: trade.status,
            allowed,
            realized_profit: None,
        });
    }

    fn publish(&self, kind: BreakerEventKind, breaker: Option<BreakerKind>, timestamp: DateTime<Utc>, message: String) {
        if let Some(sender) = &self.event_sender {
            let event = BreakerEvent {
                kind,
                breaker,
                timestamp,
                message,
            };
            if let Err(e) = sender.try_send(event) {
                warn!("Failed to publish breaker event: {}", e);
            }
        }
    }
}

/// Create a gate on the system clock
/// Seconds as a signed duration, saturating at `MAX_WINDOW_SECS`
fn window_duration(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

pub fn create_circuit_breaker(config: CircuitBreakerConfig) -> Arc<CircuitBreakerGate> {
    Arc::new(CircuitBreakerGate::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn proposal(id: &str, expected_profit: f64, pct: f64, cost: f64) -> TradeProposal {
        TradeProposal {
            id: id.to_string(),
            expected_profit,
            expected_profit_percentage: pct,
            execution_cost: cost,
            status: TradeStatus::Pending,
        }
    }

    fn winner(id: &str) -> TradeProposal {
        proposal(id, 500.0, 0.01, 50.0)
    }

    fn gate_with_clock() -> (CircuitBreakerGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = CircuitBreakerGate::with_clock(CircuitBreakerConfig::default(), clock.clone());
        (gate, clock)
    }

    #[tokio::test]
    async fn test_winning_trade_is_idempotent() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let before = gate.state().await;

        for i in 0..20 {
            let verdict = gate.evaluate(&winner(&format!("w{}", i))).await;
            assert!(verdict.allowed);
            assert!(verdict.triggered_breakers.is_empty());
        }

        let after = gate.state().await;
        assert_eq!(before.breakers, after.breakers);
        assert_eq!(after.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_cost_and_profitability_reported_together() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let verdict = gate.evaluate(&proposal("t1", 10.0, 0.0002, 250.0)).await;

        assert!(!verdict.allowed);
        assert!(verdict.triggered_breakers.contains(&BreakerKind::CostCeiling));
        assert!(verdict.triggered_breakers.contains(&BreakerKind::ProfitabilityFloor));
    }

    #[tokio::test]
    async fn test_profitability_warning_band() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let verdict = gate.evaluate(&proposal("t1", 10.0, 0.0007, 50.0)).await;

        assert!(verdict.allowed);
        assert_eq!(verdict.warnings.len(), 1);
        assert!(!gate.state().await.is_triggered(BreakerKind::ProfitabilityFloor));
    }

    #[tokio::test]
    async fn test_daily_loss_trips_at_six_percent() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());

        // Two allowed 2% losses bring the day to -4,000 on 100,000
        assert!(gate.evaluate(&proposal("l1", -2_000.0, 0.01, 50.0)).await.allowed);
        assert!(gate.evaluate(&proposal("l2", -2_000.0, 0.01, 50.0)).await.allowed);
        assert!((gate.state().await.daily_pnl + 4_000.0).abs() < 1e-9);

        let verdict = gate.evaluate(&proposal("l3", -2_000.0, 0.01, 50.0)).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.triggered_breakers, vec![BreakerKind::DailyLoss]);

        // Latched: even a winner is denied now
        let verdict = gate.evaluate(&winner("w1")).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.triggered_breakers, vec![BreakerKind::DailyLoss]);
    }

    #[tokio::test]
    async fn test_single_loss_denies_without_latching() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let verdict = gate.evaluate(&proposal("big", -3_000.0, 0.01, 50.0)).await;

        assert!(!verdict.allowed);
        assert!(verdict.triggered_breakers.is_empty());
        assert_eq!(verdict.warnings.len(), 1);
        assert!(gate.state().await.triggered().is_empty());
        assert_eq!(gate.state().await.daily_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_consecutive_losses() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());

        for i in 0..4 {
            assert!(gate.evaluate(&proposal(&format!("l{}", i), -100.0, 0.01, 50.0)).await.allowed);
        }
        // A break-even trade leaves the count unchanged
        assert!(gate.evaluate(&proposal("flat", 0.0, 0.01, 50.0)).await.allowed);
        assert_eq!(gate.state().await.consecutive_losses, 4);

        let verdict = gate.evaluate(&proposal("l4", -100.0, 0.01, 50.0)).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.triggered_breakers, vec![BreakerKind::ConsecutiveLosses]);

        // A winner resets the count but not the latch
        let verdict = gate.evaluate(&winner("w")).await;
        assert!(!verdict.allowed);
        assert_eq!(gate.state().await.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_reset_respects_cooldown() {
        let (gate, clock) = gate_with_clock();
        gate.evaluate(&proposal("t", 10.0, 0.01, 500.0)).await;
        assert!(gate.state().await.is_triggered(BreakerKind::CostCeiling));

        clock.advance_secs(120);
        match gate.reset(BreakerKind::CostCeiling).await {
            Err(BreakerError::CooldownActive { kind, remaining_secs }) => {
                assert_eq!(kind, BreakerKind::CostCeiling);
                assert_eq!(remaining_secs, 180);
            }
            other => panic!("expected cooldown error, got {:?}", other),
        }

        clock.advance_secs(181);
        let state = gate.reset(BreakerKind::CostCeiling).await.unwrap();
        assert!(!state.is_triggered(BreakerKind::CostCeiling));
        assert!(gate.evaluate(&winner("after")).await.allowed);
    }

    #[tokio::test]
    async fn test_reset_waits_for_sub_second_remainder() {
        let (gate, clock) = gate_with_clock();
        gate.evaluate(&proposal("t", 10.0, 0.01, 500.0)).await;

        clock.advance(Duration::milliseconds(299_400));
        match gate.reset(BreakerKind::CostCeiling).await {
            Err(BreakerError::CooldownActive { remaining_secs, .. }) => assert_eq!(remaining_secs, 1),
            other => panic!("expected cooldown error, got {:?}", other),
        }
        assert!(gate.reset_expired().await.is_empty());
        let status = gate.status().await;
        assert!(!status.healthy);

        clock.advance(Duration::milliseconds(600));
        let state = gate.reset(BreakerKind::CostCeiling).await.unwrap();
        assert!(!state.is_triggered(BreakerKind::CostCeiling));
    }

    #[tokio::test]
    async fn test_oversized_windows_saturate() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = CircuitBreakerConfig {
            cooldown_secs: 10_000_000_000_000,
            daily_window_secs: u64::MAX,
            metrics_window_secs: u64::MAX,
            ..CircuitBreakerConfig::default()
        };
        let gate = CircuitBreakerGate::with_clock(config, clock.clone());

        gate.emergency_stop("maintenance").await;
        let status = gate.status().await;
        assert!(status
            .breakers
            .iter()
            .all(|b| b.cooldown_remaining_secs == MAX_WINDOW_SECS as i64));
        assert!(matches!(
            gate.reset(BreakerKind::DailyLoss).await,
            Err(BreakerError::CooldownActive { .. })
        ));
        assert!(gate.trading_metrics().await.is_none());

        clock.advance_secs(MAX_WINDOW_SECS as i64);
        assert_eq!(gate.reset_expired().await.len(), BreakerKind::ALL.len());
    }

    #[tokio::test]
    async fn test_reset_untriggered_is_noop() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let before = gate.state().await;
        let after = gate.reset(BreakerKind::DailyLoss).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_emergency_stop_and_resume() {
        let (sender, mut receiver) = mpsc::channel(16);
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default()).with_event_sender(sender);

        let stopped = gate.emergency_stop("operator request").await;
        assert_eq!(stopped.triggered().len(), 4);
        assert!(!gate.evaluate(&winner("w")).await.allowed);

        let resumed = gate.resume().await;
        assert!(resumed.triggered().is_empty());
        assert!(gate.evaluate(&winner("w2")).await.allowed);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.kind, BreakerEventKind::EmergencyStop);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.kind, BreakerEventKind::Resumed);
    }

    #[tokio::test]
    async fn test_resume_without_triggers_is_noop() {
        let (sender, mut receiver) = mpsc::channel(4);
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default()).with_event_sender(sender);
        gate.evaluate(&winner("w")).await;

        let before = gate.state().await;
        let after = gate.resume().await;
        assert_eq!(before, after);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_expired() {
        let (gate, clock) = gate_with_clock();
        gate.emergency_stop("test").await;

        assert!(gate.reset_expired().await.is_empty());
        clock.advance_secs(301);
        assert_eq!(gate.reset_expired().await.len(), 4);
        assert!(gate.status().await.healthy);
    }

    #[tokio::test]
    async fn test_daily_window_rolls() {
        let (gate, clock) = gate_with_clock();
        gate.evaluate(&proposal("l1", -2_000.0, 0.01, 50.0)).await;
        gate.evaluate(&proposal("l2", -2_000.0, 0.01, 50.0)).await;

        clock.advance_secs(86_400);
        let verdict = gate.evaluate(&proposal("l3", -2_000.0, 0.01, 50.0)).await;
        assert!(verdict.allowed);
        assert!((gate.state().await.daily_pnl + 2_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_settlement_corrects_daily_pnl() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        gate.evaluate(&winner("w1")).await;
        gate.record_settlement("w1", -300.0).await.unwrap();

        assert!((gate.state().await.daily_pnl + 300.0).abs() < 1e-9);
        assert!(matches!(
            gate.record_settlement("missing", 1.0).await,
            Err(BreakerError::UnknownTrade(_))
        ));
    }

    #[tokio::test]
    async fn test_trading_metrics() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        assert!(gate.trading_metrics().await.is_none());

        for (i, realized) in [400.0, -600.0, 200.0, -100.0, 300.0].iter().enumerate() {
            let id = format!("t{}", i);
            gate.evaluate(&winner(&id)).await;
            gate.record_settlement(&id, *realized).await.unwrap();
        }

        let metrics = gate.trading_metrics().await.unwrap();
        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.winning_trades, 3);
        assert!((metrics.win_rate - 0.6).abs() < 1e-12);
        assert!((metrics.total_profit - 200.0).abs() < 1e-9);
        // Peak 400, trough -200
        assert!((metrics.max_drawdown - 600.0 / 100_000.0).abs() < 1e-12);
        assert!((metrics.risk_adjusted_return - 200.0 / 600.001).abs() < 1e-9);
        assert_eq!(metrics.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_non_finite_proposal_denied() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig::default());
        let verdict = gate.evaluate(&proposal("nan", f64::NAN, 0.01, 50.0)).await;

        assert!(!verdict.allowed);
        assert!(gate.state().await.triggered().is_empty());
        assert_eq!(gate.state().await.daily_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let gate = CircuitBreakerGate::new(CircuitBreakerConfig {
            history_capacity: 10,
            ..Default::default()
        });
        for i in 0..25 {
            gate.evaluate(&winner(&format!("w{}", i))).await;
        }
        assert_eq!(gate.status().await.trades_in_history, 10);
    }
}
