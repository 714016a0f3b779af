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

pub mod cancel;
pub mod clock;
pub mod settings;
pub mod telemetry;
// Stress testing
pub mod portfolio;
pub mod scenario;
pub mod simulator;
pub mod risk_metrics;
pub mod stress;
pub mod report;
// Allocation and trade gating
pub mod calibration;
pub mod circuit_breaker;

// Re-export common types
pub use cancel::CancellationHandle;
pub use clock::{Clock, ManualClock, SystemClock};
pub use settings::{EngineConfig, SettingsError};
pub use portfolio::{OperatingProfile, Portfolio, Position};
pub use scenario::{Scenario, ScenarioCatalog, ScenarioKind, ScenarioOverride, ScenarioType, Severity};
pub use simulator::{MonteCarloConfig, MonteCarloSimulator, ScenarioSimulator, SimulationError, SimulationRun};
pub use risk_metrics::{MetricsError, RiskMetrics};
pub use stress::{
    create_stress_orchestrator, OrchestratorConfig, Recommendation, RiskTier, ScenarioOutcome, ScenarioReport,
    SensitivityParameter, SensitivityReport, StressReport, StressTestOrchestrator,
};
pub use report::{ReportConfidence, ReportDocument};
pub use calibration::{
    create_calibration_service, CalibrationConfig, CalibrationError, CalibrationResult, CalibrationService,
    CalibrationStatus, Calibrator, RiskProfitCalibrator, Strategy, StrategySet,
};
pub use circuit_breaker::{
    create_circuit_breaker, BreakerError, BreakerEvent, BreakerKind, CircuitBreakerConfig, CircuitBreakerGate,
    CircuitBreakerState, TradeProposal, Verdict,
};
