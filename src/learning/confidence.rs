//! Rule confidence updates.
//!
//! Confidence moves toward 1.0 on success and toward 0.0 on failure by a
//! fixed EMA step. Falling under the floor deprecates the rule for good.

use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::{AgentError, AgentResult};
use crate::config::LearningConfig;
use crate::memory::{GuidanceRule, RuleState, RuleStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceModel {
    pub prior: f64,
    pub step: f64,
    pub floor: f64,
}

impl Default for ConfidenceModel {
    fn default() -> Self {
        (&LearningConfig::default()).into()
    }
}

impl From<&LearningConfig> for ConfidenceModel {
    fn from(c: &LearningConfig) -> Self {
        Self {
            prior: c.rule_prior,
            step: c.confidence_step,
            floor: c.deprecation_floor,
        }
    }
}

impl ConfidenceModel {
    /// Next state of `rule` after one observed outcome. The version is left
    /// for the store to bump.
    pub fn apply(&self, rule: &GuidanceRule, success: bool) -> GuidanceRule {
        let mut next = rule.clone();
        let target = if success { 1.0 } else { 0.0 };

        if success {
            next.success_count = next.success_count.saturating_add(1);
        } else {
            next.failure_count = next.failure_count.saturating_add(1);
        }

        let step = self.step.clamp(0.0, 1.0);
        next.confidence = (rule.confidence + step * (target - rule.confidence)).clamp(0.0, 1.0);

        if next.confidence < self.floor {
            next.state = RuleState::Deprecated;
        }
        next
    }
}

/// Read-modify-CAS until the write lands or `max_attempts` is spent.
pub async fn update_confidence(
    store: &dyn RuleStore,
    model: &ConfidenceModel,
    rule_id: Uuid,
    success: bool,
    max_attempts: u32,
) -> AgentResult<GuidanceRule> {
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let current = store
            .get(rule_id)
            .await?
            .ok_or_else(|| AgentError::NotFound { kind: "rule", id: rule_id.to_string() })?;

        let mut next = model.apply(&current, success);
        if store.compare_and_swap(&next, current.version).await? {
            next.version = current.version + 1;
            if current.is_active() && !next.is_active() {
                info!("Rule {} deprecated at confidence {:.3}", rule_id, next.confidence);
            }
            return Ok(next);
        }

        debug!("Rule {} changed underneath us (attempt {}/{})", rule_id, attempt, attempts);
        tokio::task::yield_now().await;
    }

    Err(AgentError::ConcurrencyConflict { rule_id: rule_id.to_string(), attempts })
}
