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

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::stress::{Priority, Recommendation, RiskTier, ScenarioOutcome, StressReport, SEVERE_IMPACT};

/// Days until the next scheduled review
pub const REVIEW_INTERVAL_DAYS: i64 = 30;

/// Impact above which a scenario KRI is breached
pub const IMPACT_KRI_THRESHOLD: f64 = 0.2;

/// Risk score above which the score KRI is breached
pub const SCORE_KRI_THRESHOLD: f64 = 50.0;

/// Completed scenarios needed for a high-confidence summary, exclusive
pub const HIGH_CONFIDENCE_SCENARIOS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KriStatus {
    Normal,
    Breached,
}

/// Key risk indicator compared against its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRiskIndicator {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub status: KriStatus,
}

impl KeyRiskIndicator {
    fn new(name: &str, value: f64, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            threshold,
            status: if value > threshold {
                KriStatus::Breached
            } else {
                KriStatus::Normal
            },
        }
    }
}

/// How much weight the summary can bear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportConfidence {
    High,
    Medium,
}

impl ReportConfidence {
    /// High once more than `HIGH_CONFIDENCE_SCENARIOS` scenarios completed
    pub fn from_completed(completed: usize) -> Self {
        if completed > HIGH_CONFIDENCE_SCENARIOS {
            ReportConfidence::High
        } else {
            ReportConfidence::Medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub overall_risk_score: f64,
    pub risk_tier: RiskTier,
    pub scenarios_tested: usize,
    pub scenarios_completed: usize,
    pub worst_case_impact: f64,
    pub key_findings: Vec<String>,
    /// Critical actions, also listed first in the action plan
    pub immediate_actions: Vec<String>,
    pub confidence: ReportConfidence,
}

/// Recommendations bucketed by urgency, duplicates removed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub medium_term: Vec<String>,
    pub long_term: Vec<String>,
}

impl ActionPlan {
    fn from_recommendations<'a>(recommendations: impl Iterator<Item = &'a Recommendation>) -> Self {
        let mut plan = ActionPlan::default();
        let mut seen = BTreeSet::new();

        for rec in recommendations {
            if !seen.insert(rec.action.as_str()) {
                continue;
            }
            let bucket = match rec.priority {
                Priority::Critical => &mut plan.immediate,
                Priority::High => &mut plan.short_term,
                Priority::Medium => &mut plan.medium_term,
                Priority::Low => &mut plan.long_term,
            };
            bucket.push(rec.action.clone());
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty()
            && self.short_term.is_empty()
            && self.medium_term.is_empty()
            && self.long_term.is_empty()
    }
}

/// Human-oriented rendering of a stress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: ExecutiveSummary,
    pub key_risk_indicators: Vec<KeyRiskIndicator>,
    pub action_plan: ActionPlan,
    pub partial: bool,
    pub next_review: DateTime<Utc>,
}

impl ReportDocument {
    pub fn from_report(report: &StressReport) -> Self {
        let aggregate = &report.aggregate;
        let mut key_findings = Vec::new();

        let worst = report
            .completed()
            .max_by(|(_, a), (_, b)| a.portfolio_impact.total_cmp(&b.portfolio_impact));
        if let Some((entry, metrics)) = worst {
            key_findings.push(format!(
                "Worst case is {} with {:.1}% expected impact",
                entry.name,
                metrics.portfolio_impact * 100.0
            ));
        }
        if aggregate.scenarios_above_half_impact > 0 {
            key_findings.push(format!(
                "{} scenario(s) exceed {:.0}% expected impact",
                aggregate.scenarios_above_half_impact,
                SEVERE_IMPACT * 100.0
            ));
        }
        if report.partial {
            key_findings.push(format!(
                "{} scenario(s) produced no metrics; results are partial",
                aggregate.not_completed
            ));
        }

        let mut key_risk_indicators: Vec<KeyRiskIndicator> = report
            .completed()
            .map(|(entry, metrics)| {
                KeyRiskIndicator::new(
                    &format!("{} impact", entry.name),
                    metrics.portfolio_impact,
                    IMPACT_KRI_THRESHOLD,
                )
            })
            .collect();
        key_risk_indicators.push(KeyRiskIndicator::new(
            "overall_risk_score",
            aggregate.overall_risk_score,
            SCORE_KRI_THRESHOLD,
        ));

        let scenario_recs = report
            .scenarios
            .iter()
            .filter_map(|entry| match &entry.outcome {
                ScenarioOutcome::Completed { recommendations, .. } => Some(recommendations),
                _ => None,
            })
            .flatten();
        let action_plan = ActionPlan::from_recommendations(report.recommendations.iter().chain(scenario_recs));

        Self {
            report_id: report.id.to_string(),
            generated_at: report.generated_at,
            executive_summary: ExecutiveSummary {
                overall_risk_score: aggregate.overall_risk_score,
                risk_tier: report.risk_tier,
                scenarios_tested: report.scenarios.len(),
                scenarios_completed: aggregate.completed,
                worst_case_impact: aggregate.worst_case_impact,
                key_findings,
                immediate_actions: action_plan.immediate.clone(),
                confidence: ReportConfidence::from_completed(aggregate.completed),
            },
            key_risk_indicators,
            action_plan,
            partial: report.partial,
            next_review: report.generated_at + Duration::days(REVIEW_INTERVAL_DAYS),
        }
    }

    pub fn breached_indicators(&self) -> impl Iterator<Item = &KeyRiskIndicator> {
        self.key_risk_indicators
            .iter()
            .filter(|k| k.status == KriStatus::Breached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk_metrics::RiskMetrics;
    use crate::scenario::{ScenarioType, Severity};
    use crate::stress::{AggregateMetrics, FailureKind, ScenarioReport};
    use uuid::Uuid;

    fn entry(name: &str, outcome: ScenarioOutcome) -> ScenarioReport {
        ScenarioReport {
            name: name.to_string(),
            scenario_type: ScenarioType::Generic,
            severity: Severity::High,
            probability: 0.1,
            seed: 1,
            elapsed_ms: 3,
            outcome,
        }
    }

    fn report() -> StressReport {
        let metrics = RiskMetrics {
            portfolio_impact: 0.6,
            max_drawdown: 0.8,
            var: 0.7,
            expected_shortfall: 0.75,
            survival_probability: 0.4,
            confidence: 0.95,
            trials: 1_000,
        };
        let shared = Recommendation {
            priority: Priority::Critical,
            action: "Reduce risk immediately".to_string(),
        };
        StressReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            base_seed: 9,
            portfolio_value: 1_000_000.0,
            elapsed_ms: 10,
            scenarios: vec![
                entry(
                    "Depeg",
                    ScenarioOutcome::Completed {
                        metrics,
                        recommendations: vec![
                            shared.clone(),
                            Recommendation {
                                priority: Priority::Medium,
                                action: "Cap exposure per protocol".to_string(),
                            },
                        ],
                    },
                ),
                entry(
                    "Broken",
                    ScenarioOutcome::Failed {
                        kind: FailureKind::ScenarioConfig,
                        reason: "bad".to_string(),
                    },
                ),
            ],
            aggregate: AggregateMetrics {
                worst_case_impact: 0.6,
                average_impact: 0.6,
                max_drawdown: 0.8,
                highest_var: 0.7,
                scenarios_above_half_impact: 1,
                completed: 1,
                not_completed: 1,
                overall_risk_score: 60.0,
            },
            risk_tier: RiskTier::High,
            recommendations: vec![shared],
            partial: true,
            cancelled: false,
        }
    }

    #[test]
    fn test_document_from_report() {
        let report = report();
        let document = ReportDocument::from_report(&report);

        assert_eq!(document.executive_summary.scenarios_tested, 2);
        assert_eq!(document.executive_summary.key_findings.len(), 3);
        assert!(document.executive_summary.key_findings[0].contains("Depeg"));
        // Depeg impact and the overall score
        assert_eq!(document.breached_indicators().count(), 2);
        assert_eq!(document.key_risk_indicators.len(), 2);
        assert_eq!(document.executive_summary.confidence, ReportConfidence::Medium);
        assert_eq!(document.next_review - report.generated_at, Duration::days(30));
        assert!(document.partial);
    }

    #[test]
    fn test_action_plan_dedupes_and_buckets() {
        let document = ReportDocument::from_report(&report());
        let plan = &document.action_plan;

        assert_eq!(plan.immediate, vec!["Reduce risk immediately".to_string()]);
        assert_eq!(document.executive_summary.immediate_actions, plan.immediate);
        assert_eq!(plan.medium_term, vec!["Cap exposure per protocol".to_string()]);
        assert!(plan.short_term.is_empty());
        assert!(!plan.is_empty());
    }
}
