//! Learning Pipeline
//!
//! Post-consultation hook. Successful consultations become cases, failed
//! ones are reflected on and may yield a new guidance rule, and every rule
//! the advisor was shown has its confidence nudged by the outcome.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::confidence::{update_confidence, ConfidenceModel};
use super::validation::{validate_principle, PrincipleVerdict};
use crate::agent::{AgentResult, Reflector};
use crate::config::LearningConfig;
use crate::memory::{Case, CaseStore, GuidanceRule, RetrievalEngine, RuleStore};
use crate::orchestrator::event_bus::{AgencyEvent, EventBus};
use crate::orchestrator::{ConsultationResult, OutcomeStatus};

/// What happened to a candidate principle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Accepted { rule: GuidanceRule },
    Rejected { principle: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub consultation: Uuid,
    /// Set when the consultation taught nothing by design
    pub skipped: Option<String>,
    pub case_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub rejected_candidate: Option<String>,
    pub rules_updated: usize,
    pub rules_deprecated: usize,
    pub errors: Vec<String>,
}

/// How far learning from one consultation got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Running,
    /// Confidence updates landed; extraction failed on infrastructure and may be retried
    ConfidenceApplied,
    Done,
}

pub struct LearningPipeline {
    engine: Arc<RetrievalEngine>,
    cases: Arc<dyn CaseStore>,
    rules: Arc<dyn RuleStore>,
    reflector: Reflector,
    model: ConfidenceModel,
    config: LearningConfig,
    events: Option<Arc<EventBus>>,
    processed: Mutex<HashMap<Uuid, Progress>>,
}

impl LearningPipeline {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        cases: Arc<dyn CaseStore>,
        rules: Arc<dyn RuleStore>,
        reflector: Reflector,
        config: LearningConfig,
    ) -> Self {
        Self {
            engine,
            cases,
            rules,
            reflector,
            model: ConfidenceModel::from(&config),
            config,
            events: None,
            processed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cases(&self) -> Arc<dyn CaseStore> {
        self.cases.clone()
    }

    pub fn rules(&self) -> Arc<dyn RuleStore> {
        self.rules.clone()
    }

    fn emit(&self, event: AgencyEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Apply one consultation's lessons. Each id is handled at most once;
    /// infrastructure failures teach nothing. Step failures are collected in
    /// the report and never abort the other steps. When extraction fails on
    /// infrastructure the consultation may be processed again, and only the
    /// extraction is repeated.
    #[instrument(skip_all, fields(consultation = %result.id, successful = result.outcome.successful))]
    pub async fn process(&self, result: &ConsultationResult) -> LearningReport {
        let mut report = LearningReport { consultation: result.id, ..Default::default() };

        let resume = {
            let mut processed = self.processed.lock().await;
            match processed.get(&result.id).copied() {
                Some(Progress::Running) | Some(Progress::Done) => {
                    debug!("Consultation already processed");
                    report.skipped = Some("already processed".to_string());
                    return report;
                }
                Some(Progress::ConfidenceApplied) => {
                    processed.insert(result.id, Progress::Running);
                    true
                }
                None => {
                    processed.insert(result.id, Progress::Running);
                    false
                }
            }
        };

        if result.outcome.status == OutcomeStatus::Failed {
            self.mark(result.id, Progress::Done).await;
            report.skipped = Some(format!("infrastructure failure: {:?}", result.outcome.termination));
            return report;
        }

        let success = result.outcome.successful;
        if resume {
            debug!("Retrying extraction; confidence updates already applied");
        } else {
            for rule_id in &result.applied_rule_ids {
                match self.apply_outcome(*rule_id, success).await {
                    Ok((_, newly_deprecated)) => {
                        report.rules_updated += 1;
                        if newly_deprecated {
                            report.rules_deprecated += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Confidence update for rule {} failed: {}", rule_id, e);
                        report.errors.push(e.to_string());
                    }
                }
            }
        }

        let extraction = if success {
            match self.learn_from_successful_consultation(result).await {
                Ok(case) => {
                    report.case_id = case.map(|c| c.id);
                    Ok(())
                }
                Err(e) => {
                    warn!("Case extraction failed: {}", e);
                    Err(e)
                }
            }
        } else {
            match self.learn_from_failure(result).await {
                Ok(Some(CandidateOutcome::Accepted { rule })) => {
                    report.rule_id = Some(rule.id);
                    Ok(())
                }
                Ok(Some(CandidateOutcome::Rejected { principle, reason })) => {
                    debug!("Candidate rejected ({}): {}", reason, principle);
                    report.rejected_candidate = Some(reason);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    warn!("Reflection on failure produced no rule: {}", e);
                    Err(e)
                }
            }
        };

        let progress = match extraction {
            Err(e) => {
                let retryable = e.is_infrastructure();
                report.errors.push(e.to_string());
                if retryable {
                    Progress::ConfidenceApplied
                } else {
                    Progress::Done
                }
            }
            Ok(()) => Progress::Done,
        };
        self.mark(result.id, progress).await;

        info!(
            "Learning done: case={:?} rule={:?} updated={} deprecated={} errors={}",
            report.case_id,
            report.rule_id,
            report.rules_updated,
            report.rules_deprecated,
            report.errors.len()
        );
        report
    }

    async fn mark(&self, id: Uuid, progress: Progress) {
        self.processed.lock().await.insert(id, progress);
    }

    /// Record a case from a successful consultation. No-op for unsuccessful
    /// ones and for consultations that already produced a case.
    #[instrument(skip_all, fields(consultation = %result.id))]
    pub async fn learn_from_successful_consultation(&self, result: &ConsultationResult) -> AgentResult<Option<Case>> {
        if !result.outcome.successful {
            return Ok(None);
        }
        if let Some(existing) = self.cases.find_by_consultation(result.id).await? {
            debug!("Case {} already recorded for this consultation", existing.id);
            return Ok(None);
        }

        let task_type = self.reflector.classify_task(result).await?;
        let summary = self.reflector.summarize_situation(result).await?;
        let embedding = self.engine.embed(&summary.situation).await?;

        let case = Case {
            id: Uuid::new_v4(),
            situation_summary: summary.situation,
            task_type,
            action_taken: summary.action,
            outcome_summary: summary.outcome,
            embedding,
            created_at: result.ended_at,
            source_consultation: result.id,
        };
        self.cases.insert(case.clone()).await?;

        info!("Recorded {} case {}", case.task_type, case.id);
        self.emit(AgencyEvent::CaseRecorded { case: case.id, consultation: result.id });
        Ok(Some(case))
    }

    /// Reflect, validate, refine and judge. An accepted candidate becomes an
    /// active rule at the prior confidence.
    #[instrument(skip_all, fields(consultation = %result.id))]
    pub async fn learn_from_failure(&self, result: &ConsultationResult) -> AgentResult<Option<CandidateOutcome>> {
        if result.outcome.successful || result.outcome.status == OutcomeStatus::Failed {
            return Ok(None);
        }

        let candidate = self.reflector.reflect_on_failure(result).await?;
        let rules = self.rules.all().await?;

        let embedding = self.engine.embed(&candidate.principle).await?;
        if let Some(outcome) = self.screen(&candidate.principle, &embedding, &candidate.category, &rules) {
            return Ok(Some(outcome));
        }

        let refined = self.reflector.refine_principle(&candidate).await?;
        let refined_embedding = self.engine.embed(&refined).await?;
        if let Some(outcome) = self.screen(&refined, &refined_embedding, &candidate.category, &rules) {
            return Ok(Some(outcome));
        }

        let value = self.reflector.judge_rule_value(&refined, &candidate.category).await?;
        if !value.accept || value.score < self.config.min_rule_value {
            let reason = format!("judged value {:.2} (accept={})", value.score, value.accept);
            self.emit(AgencyEvent::CandidateRejected { category: candidate.category.clone(), reason: reason.clone() });
            return Ok(Some(CandidateOutcome::Rejected { principle: refined, reason }));
        }

        let rule = GuidanceRule::new(refined, candidate.category, refined_embedding, self.model.prior);
        self.rules.insert(rule.clone()).await?;

        info!("New {} rule {}: {}", rule.category, rule.id, rule.principle);
        self.emit(AgencyEvent::RuleCreated { rule: rule.id, category: rule.category.clone() });
        Ok(Some(CandidateOutcome::Accepted { rule }))
    }

    fn screen(&self, principle: &str, embedding: &[f32], category: &str, rules: &[GuidanceRule]) -> Option<CandidateOutcome> {
        let reason = match validate_principle(principle, embedding, category, rules, self.config.redundancy_threshold) {
            PrincipleVerdict::Novel => return None,
            PrincipleVerdict::Redundant { rule_id, similarity } => {
                format!("redundant with rule {} (similarity {:.3})", rule_id, similarity)
            }
            PrincipleVerdict::Contradicts { rule_id, overlap } => {
                format!("contradicts rule {} (overlap {:.2})", rule_id, overlap)
            }
        };
        self.emit(AgencyEvent::CandidateRejected { category: category.to_string(), reason: reason.clone() });
        Some(CandidateOutcome::Rejected { principle: principle.to_string(), reason })
    }

    /// Count the outcome against the rule and move its confidence.
    pub async fn update_rule_confidence(&self, rule_id: Uuid, success: bool) -> AgentResult<GuidanceRule> {
        Ok(self.apply_outcome(rule_id, success).await?.0)
    }

    async fn apply_outcome(&self, rule_id: Uuid, success: bool) -> AgentResult<(GuidanceRule, bool)> {
        let was_active = self.rules.get(rule_id).await?.map_or(false, |r| r.is_active());
        let rule = update_confidence(
            self.rules.as_ref(),
            &self.model,
            rule_id,
            success,
            self.config.max_update_attempts,
        )
        .await?;

        self.emit(AgencyEvent::RuleUpdated { rule: rule.id, confidence: rule.confidence, version: rule.version });
        let newly_deprecated = was_active && !rule.is_active();
        if newly_deprecated {
            self.emit(AgencyEvent::RuleDeprecated { rule: rule.id, confidence: rule.confidence });
        }
        Ok((rule, newly_deprecated))
    }

    /// Forget which consultations were processed (e.g. between evaluation rounds).
    pub async fn reset_processed(&self) {
        self.processed.lock().await.clear();
    }
}

impl std::fmt::Debug for LearningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningPipeline").field("config", &self.config).finish_non_exhaustive()
    }
}
