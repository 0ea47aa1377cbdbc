//! Evaluation and ablation harness.
//!
//! Runs one consultation per customer, concurrently up to the worker limit,
//! each under a timeout. A run that times out is dropped mid-flight and
//! counted as failed.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::metrics::{AdvisorMetrics, MetricDelta};
use crate::agent::{AdvisorPolicy, CustomerPolicy};
use crate::config::EvaluationConfig;
use crate::learning::{LearningPipeline, LearningReport};
use crate::orchestrator::{ConsultationResult, Orchestrator, OutcomeResult, RetrievalSources, TerminationReason};

/// Full record of one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub metrics: AdvisorMetrics,
    pub results: Vec<ConsultationResult>,
    pub learning: Vec<LearningReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AblationVariant {
    pub name: String,
    pub sources: RetrievalSources,
    pub metrics: AdvisorMetrics,
    pub delta: MetricDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AblationReport {
    pub baseline: AdvisorMetrics,
    pub variants: Vec<AblationVariant>,
}

impl AblationReport {
    pub fn variant(&self, name: &str) -> Option<&AblationVariant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

pub struct EvaluationHarness {
    orchestrator: Orchestrator,
    learning: Option<Arc<LearningPipeline>>,
    config: EvaluationConfig,
}

impl EvaluationHarness {
    pub fn new(orchestrator: Orchestrator, config: EvaluationConfig) -> Self {
        Self { orchestrator, learning: None, config }
    }

    /// Feed finished runs to `pipeline` (when enabled in config).
    pub fn with_learning(mut self, pipeline: Arc<LearningPipeline>) -> Self {
        self.learning = Some(pipeline);
        self
    }

    pub async fn evaluate_advisor(
        &self,
        advisor: Arc<dyn AdvisorPolicy>,
        customers: &[Arc<dyn CustomerPolicy>],
        max_turns: usize,
    ) -> AdvisorMetrics {
        self.evaluate_detailed(advisor, customers, max_turns).await.metrics
    }

    #[instrument(skip_all, fields(advisor = advisor.name(), customers = customers.len()))]
    pub async fn evaluate_detailed(
        &self,
        advisor: Arc<dyn AdvisorPolicy>,
        customers: &[Arc<dyn CustomerPolicy>],
        max_turns: usize,
    ) -> EvaluationRun {
        let learning = if self.config.learn_during_evaluation { self.learning.clone() } else { None };
        let (results, learning) = self
            .run_all(&self.orchestrator, advisor.clone(), customers, max_turns, learning)
            .await;

        let metrics = AdvisorMetrics::from_outcomes(advisor.name(), results.iter().map(|r| &r.outcome));
        info!(
            "Evaluated {}: {}/{} successful, {} failed",
            metrics.advisor, metrics.successful, metrics.runs, metrics.failed
        );
        EvaluationRun { metrics, results, learning }
    }

    /// Baseline with every source, then one pass each without cases, rules
    /// and memory. Experience is frozen for the whole study so the variants
    /// see the same stores.
    #[instrument(skip_all, fields(advisor = advisor.name(), customers = customers.len()))]
    pub async fn run_ablation_study(
        &self,
        advisor: Arc<dyn AdvisorPolicy>,
        customers: &[Arc<dyn CustomerPolicy>],
        max_turns: usize,
    ) -> AblationReport {
        let base_sources = self.orchestrator.sources();
        let baseline = self.metrics_for(base_sources, advisor.clone(), customers, max_turns).await;

        let plans = [
            ("without_cases", RetrievalSources { cases: false, ..base_sources }),
            ("without_rules", RetrievalSources { rules: false, ..base_sources }),
            ("without_memory", RetrievalSources { memory: false, ..base_sources }),
        ];

        let mut variants = Vec::with_capacity(plans.len());
        for (name, sources) in plans {
            let metrics = self.metrics_for(sources, advisor.clone(), customers, max_turns).await;
            let delta = MetricDelta::between(&baseline, &metrics);
            info!("Ablation {}: success rate delta {:+.3}", name, delta.success_rate);
            variants.push(AblationVariant { name: name.to_string(), sources, metrics, delta });
        }

        AblationReport { baseline, variants }
    }

    async fn metrics_for(
        &self,
        sources: RetrievalSources,
        advisor: Arc<dyn AdvisorPolicy>,
        customers: &[Arc<dyn CustomerPolicy>],
        max_turns: usize,
    ) -> AdvisorMetrics {
        let orchestrator = self.orchestrator.clone().with_sources(sources);
        let (results, _) = self.run_all(&orchestrator, advisor.clone(), customers, max_turns, None).await;
        AdvisorMetrics::from_outcomes(advisor.name(), results.iter().map(|r| &r.outcome))
    }

    async fn run_all(
        &self,
        orchestrator: &Orchestrator,
        advisor: Arc<dyn AdvisorPolicy>,
        customers: &[Arc<dyn CustomerPolicy>],
        max_turns: usize,
        learning: Option<Arc<LearningPipeline>>,
    ) -> (Vec<ConsultationResult>, Vec<LearningReport>) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let limit = Duration::from_secs(self.config.run_timeout_secs.max(1));

        let tasks = customers.iter().map(|customer| {
            let semaphore = semaphore.clone();
            let orchestrator = orchestrator.clone();
            let advisor = advisor.clone();
            let customer = customer.clone();
            let learning = learning.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                let result = match timeout(limit, orchestrator.run(advisor.as_ref(), customer.as_ref(), max_turns)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Consultation with {} timed out after {:?}", customer.profile().id, limit);
                        timed_out(advisor.as_ref(), customer.as_ref())
                    }
                };
                let report = match learning {
                    Some(pipeline) => learn_in_isolation(pipeline, result.clone()).await,
                    None => None,
                };
                (result, report)
            })
        });

        let mut results = Vec::with_capacity(customers.len());
        let mut reports = Vec::new();
        for (customer, joined) in customers.iter().zip(join_all(tasks).await) {
            match joined {
                Ok((result, report)) => {
                    results.push(result);
                    reports.extend(report);
                }
                Err(e) => {
                    warn!("Consultation task for {} panicked: {}", customer.profile().id, e);
                    results.push(timed_out_with(advisor.as_ref(), customer.as_ref(), TerminationReason::ProviderFailure(e.to_string())));
                }
            }
        }
        (results, reports)
    }
}

/// Learning runs in its own task so a failure there cannot lose the
/// consultation that fed it.
async fn learn_in_isolation(pipeline: Arc<LearningPipeline>, result: ConsultationResult) -> Option<LearningReport> {
    let id = result.id;
    match tokio::spawn(async move { pipeline.process(&result).await }).await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("Learning from consultation {} aborted: {}", id, e);
            None
        }
    }
}

fn timed_out(advisor: &dyn AdvisorPolicy, customer: &dyn CustomerPolicy) -> ConsultationResult {
    timed_out_with(advisor, customer, TerminationReason::Cancelled)
}

fn timed_out_with(advisor: &dyn AdvisorPolicy, customer: &dyn CustomerPolicy, reason: TerminationReason) -> ConsultationResult {
    let now = Utc::now();
    let profile = customer.profile();
    ConsultationResult {
        id: Uuid::new_v4(),
        customer_id: profile.id.clone(),
        advisor: advisor.name().to_string(),
        brief: profile.brief.clone(),
        transcript: Vec::new(),
        outcome: OutcomeResult::failed(reason, 0),
        applied_rule_ids: Vec::new(),
        retrieved_case_ids: Vec::new(),
        started_at: now,
        ended_at: now,
    }
}
