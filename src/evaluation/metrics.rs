//! Aggregate advisor metrics.

use serde::{Deserialize, Serialize};

use crate::orchestrator::{OutcomeResult, OutcomeStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdvisorMetrics {
    pub advisor: String,
    pub runs: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub failed: usize,
    pub successful: usize,
    /// Rates and means are over runs that did not fail.
    pub success_rate: f64,
    pub mean_satisfaction: f64,
    pub compliance_rate: f64,
    pub mean_turns: f64,
}

impl AdvisorMetrics {
    pub fn from_outcomes<'a>(advisor: impl Into<String>, outcomes: impl IntoIterator<Item = &'a OutcomeResult>) -> Self {
        let mut m = AdvisorMetrics { advisor: advisor.into(), ..Default::default() };
        let (mut satisfaction, mut compliant, mut turns) = (0.0f64, 0usize, 0usize);

        for o in outcomes {
            m.runs += 1;
            match o.status {
                OutcomeStatus::Completed => m.completed += 1,
                OutcomeStatus::Incomplete => m.incomplete += 1,
                OutcomeStatus::Failed => {
                    m.failed += 1;
                    continue;
                }
            }
            if o.successful {
                m.successful += 1;
            }
            if o.compliance_issues.is_empty() {
                compliant += 1;
            }
            satisfaction += o.customer_satisfaction as f64;
            turns += o.turns_used;
        }

        let scored = m.runs - m.failed;
        if scored > 0 {
            let n = scored as f64;
            m.success_rate = m.successful as f64 / n;
            m.mean_satisfaction = satisfaction / n;
            m.compliance_rate = compliant as f64 / n;
            m.mean_turns = turns as f64 / n;
        }
        m
    }
}

/// `variant - baseline` for each rate
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricDelta {
    pub success_rate: f64,
    pub mean_satisfaction: f64,
    pub compliance_rate: f64,
    pub mean_turns: f64,
}

impl MetricDelta {
    pub fn between(baseline: &AdvisorMetrics, variant: &AdvisorMetrics) -> Self {
        Self {
            success_rate: variant.success_rate - baseline.success_rate,
            mean_satisfaction: variant.mean_satisfaction - baseline.mean_satisfaction,
            compliance_rate: variant.compliance_rate - baseline.compliance_rate,
            mean_turns: variant.mean_turns - baseline.mean_turns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::TerminationReason;

    #[test]
    fn test_failed_runs_do_not_dilute_rates() {
        let outcomes = vec![
            OutcomeResult::assess(TerminationReason::CustomerEnded, 4, 0.9, true, vec![]),
            OutcomeResult::assess(TerminationReason::MaxTurnsReached, 8, 0.5, false, vec!["risk-free".into()]),
            OutcomeResult::failed(TerminationReason::ProviderFailure("timeout".into()), 1),
        ];
        let m = AdvisorMetrics::from_outcomes("baseline", &outcomes);

        assert_eq!((m.runs, m.completed, m.incomplete, m.failed, m.successful), (3, 1, 1, 1, 1));
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!((m.mean_satisfaction - 0.7).abs() < 1e-6);
        assert!((m.compliance_rate - 0.5).abs() < 1e-9);
        assert!((m.mean_turns - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_runs_is_all_zero() {
        let m = AdvisorMetrics::from_outcomes("x", &[]);
        assert_eq!(m.runs, 0);
        assert_eq!(m.success_rate, 0.0);
        assert_eq!(MetricDelta::between(&m, &m), MetricDelta::default());
    }
}
