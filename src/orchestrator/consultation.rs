//! Consultation Orchestrator
//!
//! Drives one simulated consultation through the turn state machine. Each
//! advisor turn embeds the latest customer message once and uses it to pull
//! context from the memory stream, the case base, the rule base and the
//! static knowledge. Retrieval failures shrink the context; policy failures
//! end the consultation as `failed`.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::VirtualClock;
use super::event_bus::{AgencyEvent, EventBus};
use super::outcome::{ConsultationResult, OutcomeResult, Turn};
use super::state::{ConsultationState, TerminationReason, TurnSignals};
use crate::agent::{
    AdvisorContext, AdvisorPolicy, AgentError, AgentResult, CustomerContext, CustomerPolicy, Speaker,
};
use crate::config::{AgencyConfig, ConsultationConfig, RetrievalConfig};
use crate::memory::{
    CaseStore, KnowledgeProvider, MemoryNode, MemoryStream, RetrievalEngine, RuleStore, StaticKnowledge,
    StreamWeights,
};
use crate::safety::{strip_reasoning, ComplianceValidator, RuleBasedCompliance};

/// Which retrieval sources feed the advisor context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSources {
    pub cases: bool,
    pub rules: bool,
    pub memory: bool,
    pub knowledge: bool,
}

impl Default for RetrievalSources {
    fn default() -> Self {
        Self::all()
    }
}

impl RetrievalSources {
    pub fn all() -> Self {
        Self { cases: true, rules: true, memory: true, knowledge: true }
    }

    pub fn none() -> Self {
        Self { cases: false, rules: false, memory: false, knowledge: false }
    }
}

const CUSTOMER_IMPORTANCE: f32 = 0.7;
const ADVISOR_IMPORTANCE: f32 = 0.4;
const BRIEF_IMPORTANCE: f32 = 0.9;

#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<RetrievalEngine>,
    cases: Arc<dyn CaseStore>,
    rules: Arc<dyn RuleStore>,
    knowledge: Arc<dyn KnowledgeProvider>,
    compliance: Arc<dyn ComplianceValidator>,
    events: Option<Arc<EventBus>>,
    sources: RetrievalSources,
    retrieval: RetrievalConfig,
    weights: StreamWeights,
    consultation: ConsultationConfig,
}

/// Per-run mutable state
struct Session {
    id: Uuid,
    clock: VirtualClock,
    stream: MemoryStream,
    transcript: Vec<Turn>,
    applied_rule_ids: Vec<Uuid>,
    retrieved_case_ids: Vec<Uuid>,
    last_customer: String,
    brief_recorded: bool,
}

fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

impl Orchestrator {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        cases: Arc<dyn CaseStore>,
        rules: Arc<dyn RuleStore>,
        config: &AgencyConfig,
    ) -> Self {
        Self {
            engine,
            cases,
            rules,
            knowledge: Arc::new(StaticKnowledge::empty()),
            compliance: Arc::new(RuleBasedCompliance::new()),
            events: None,
            sources: RetrievalSources::all(),
            retrieval: config.retrieval.clone(),
            weights: StreamWeights::from(&config.memory),
            consultation: config.consultation.clone(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeProvider>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_compliance(mut self, compliance: Arc<dyn ComplianceValidator>) -> Self {
        self.compliance = compliance;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_sources(mut self, sources: RetrievalSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn sources(&self) -> RetrievalSources {
        self.sources
    }

    fn emit(&self, event: AgencyEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run a consultation and return only its outcome.
    pub async fn run_consultation(
        &self,
        advisor: &dyn AdvisorPolicy,
        customer: &dyn CustomerPolicy,
        max_turns: usize,
    ) -> OutcomeResult {
        self.run(advisor, customer, max_turns).await.outcome
    }

    /// Run a consultation to a terminal state.
    #[tracing::instrument(skip_all, fields(advisor = advisor.name(), customer = %customer.profile().id, max_turns = max_turns))]
    pub async fn run(
        &self,
        advisor: &dyn AdvisorPolicy,
        customer: &dyn CustomerPolicy,
        max_turns: usize,
    ) -> ConsultationResult {
        let clock = VirtualClock::from_config(self.consultation.clock_start.as_deref()).unwrap_or_else(|e| {
            warn!("{}; starting the virtual clock now", e);
            VirtualClock::new(Utc::now())
        });
        let profile = customer.profile().clone();

        let mut session = Session {
            id: Uuid::new_v4(),
            clock,
            stream: MemoryStream::new(self.weights),
            transcript: Vec::new(),
            applied_rule_ids: Vec::new(),
            retrieved_case_ids: Vec::new(),
            last_customer: profile.brief.clone(),
            brief_recorded: false,
        };
        let started_at = session.clock.now();

        info!("Consultation {} started", session.id);
        self.emit(AgencyEvent::ConsultationStarted {
            consultation: session.id,
            customer: profile.id.clone(),
            advisor: advisor.name().to_string(),
        });

        let mut signals = TurnSignals { max_turns, ..Default::default() };
        let mut state = ConsultationState::Start.next(&signals);

        while !state.is_terminal() {
            let index = signals.turns_used;
            let step = match state {
                ConsultationState::AdvisorTurn => self.advisor_turn(&mut session, advisor, &mut signals, &profile.brief).await,
                ConsultationState::CustomerTurn => self.customer_turn(&mut session, customer, &mut signals).await,
                _ => Ok(()),
            };

            if let Err(e) = step {
                let e = e.on_turn(index);
                warn!("Consultation {} stopped on turn {}: {}", session.id, index, e);
                state = ConsultationState::fail(TerminationReason::ProviderFailure(e.to_string()));
                break;
            }

            signals.turns_used += 1;
            session.clock.advance(Duration::minutes(self.consultation.turn_minutes));
            state = state.next(&signals);
        }

        let termination = match state {
            ConsultationState::Terminal(reason) => reason,
            _ => TerminationReason::Cancelled,
        };
        let outcome = self.conclude(&session, customer, termination, signals.turns_used).await;

        info!(
            "Consultation {} finished: {:?} successful={} turns={}",
            session.id, outcome.termination, outcome.successful, outcome.turns_used
        );
        self.emit(AgencyEvent::ConsultationFinished {
            consultation: session.id,
            termination: outcome.termination.clone(),
            successful: outcome.successful,
            turns_used: outcome.turns_used,
        });

        ConsultationResult {
            id: session.id,
            customer_id: profile.id,
            advisor: advisor.name().to_string(),
            brief: profile.brief,
            transcript: session.transcript,
            outcome,
            applied_rule_ids: session.applied_rule_ids,
            retrieved_case_ids: session.retrieved_case_ids,
            started_at,
            ended_at: session.clock.now(),
        }
    }

    async fn advisor_turn(
        &self,
        session: &mut Session,
        advisor: &dyn AdvisorPolicy,
        signals: &mut TurnSignals,
        brief: &str,
    ) -> AgentResult<()> {
        let query = session.last_customer.clone();
        let query_embedding = match self.engine.embed(&query).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Query embedding unavailable, advising without retrieved context: {}", e);
                None
            }
        };

        let mut ctx = AdvisorContext {
            brief: brief.to_string(),
            transcript: session.transcript.clone(),
            elapsed: session.clock.describe_elapsed(),
            turns_remaining: signals.max_turns.saturating_sub(signals.turns_used),
            ..Default::default()
        };

        if let Some(q) = &query_embedding {
            self.retrieve_into(&mut ctx, session, q).await;

            // The customer's latest message joins working memory after it was
            // used as the query, so it never retrieves itself.
            if self.sources.memory {
                let importance = if session.brief_recorded { CUSTOMER_IMPORTANCE } else { BRIEF_IMPORTANCE };
                session.stream.push(
                    MemoryNode::observation(format!("Customer: {}", query), session.clock.now(), q.clone())
                        .with_importance(importance),
                );
                session.brief_recorded = true;
            }
        }

        for r in &ctx.rules {
            push_unique(&mut session.applied_rule_ids, r.item.id);
        }
        for c in &ctx.cases {
            push_unique(&mut session.retrieved_case_ids, c.item.id);
        }

        let reply = advisor.respond(&ctx).await?;
        let visible = strip_reasoning(&reply.text);
        signals.advisor_resolved |= reply.resolved;

        if self.sources.memory && query_embedding.is_some() {
            match self.engine.embed(&visible).await {
                Ok(embedding) => session.stream.push(
                    MemoryNode::observation(format!("Advisor: {}", visible), session.clock.now(), embedding)
                        .with_importance(ADVISOR_IMPORTANCE),
                ),
                Err(e) => debug!("Advisor turn not added to memory: {}", e),
            }
        }

        self.record(session, Speaker::Advisor, reply.text, visible);
        Ok(())
    }

    async fn retrieve_into(&self, ctx: &mut AdvisorContext, session: &mut Session, query: &[f32]) {
        let now = session.clock.now();

        if self.sources.memory {
            ctx.memories = session.stream.retrieve(query, now, self.retrieval.memory_k);
        }
        if self.sources.cases {
            ctx.cases = self
                .cases
                .search(query, self.retrieval.case_k, None)
                .await
                .unwrap_or_else(|e| degrade("case base", e));
        }
        if self.sources.rules {
            ctx.rules = self
                .rules
                .search(query, self.retrieval.rule_k, None)
                .await
                .unwrap_or_else(|e| degrade("rule base", e));
        }
        if self.sources.knowledge {
            ctx.knowledge = self
                .knowledge
                .search(query, self.retrieval.knowledge_k, None)
                .await
                .unwrap_or_else(|e| degrade("knowledge", e));
        }
        debug!(
            "Context: {} memories, {} cases, {} rules, {} knowledge",
            ctx.memories.len(),
            ctx.cases.len(),
            ctx.rules.len(),
            ctx.knowledge.len()
        );
    }

    async fn customer_turn(
        &self,
        session: &mut Session,
        customer: &dyn CustomerPolicy,
        signals: &mut TurnSignals,
    ) -> AgentResult<()> {
        let latest_advisor = session
            .transcript
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::Advisor)
            .map(|t| t.visible.clone())
            .unwrap_or_default();

        let ctx = CustomerContext {
            transcript: session.transcript.iter().map(Turn::shown_to_customer).collect(),
            latest_advisor,
            elapsed: session.clock.describe_elapsed(),
        };

        let reply = customer.respond(&ctx).await?;
        signals.customer_ended |= reply.ends;
        session.last_customer = reply.text.clone();

        let visible = reply.text.clone();
        self.record(session, Speaker::Customer, reply.text, visible);

        if let Some(pause) = reply.pause {
            debug!("Customer paused for {:?}", pause);
            session.clock.advance(pause);
        }
        Ok(())
    }

    fn record(&self, session: &mut Session, speaker: Speaker, content: String, visible: String) {
        let index = session.transcript.len();
        session.transcript.push(Turn {
            index,
            speaker,
            content,
            visible,
            at: session.clock.now(),
        });
        self.emit(AgencyEvent::TurnCompleted {
            consultation: session.id,
            index,
            speaker: speaker.to_string(),
        });
    }

    async fn conclude(
        &self,
        session: &Session,
        customer: &dyn CustomerPolicy,
        termination: TerminationReason,
        turns_used: usize,
    ) -> OutcomeResult {
        if matches!(termination, TerminationReason::ProviderFailure(_) | TerminationReason::Cancelled) {
            return OutcomeResult::failed(termination, turns_used);
        }

        let issues = match self.compliance_issues(&session.transcript).await {
            Ok(issues) => issues,
            Err(e) => return OutcomeResult::failed(TerminationReason::ProviderFailure(e.to_string()), turns_used),
        };

        let seen: Vec<Turn> = session.transcript.iter().map(Turn::shown_to_customer).collect();
        match customer.assess(&seen).await {
            Ok(assessment) => {
                OutcomeResult::assess(termination, turns_used, assessment.satisfaction, assessment.accepted, issues)
            }
            Err(e) => {
                warn!("Customer assessment failed: {}", e);
                OutcomeResult::failed(TerminationReason::ProviderFailure(e.to_string()), turns_used)
            }
        }
    }

    /// Advisor turns only, reasoning removed.
    async fn compliance_issues(&self, transcript: &[Turn]) -> AgentResult<Vec<String>> {
        let mut issues = Vec::new();
        for turn in transcript.iter().filter(|t| t.speaker == Speaker::Advisor) {
            let report = self.compliance.validate(&turn.visible).await?;
            issues.extend(report.issues.into_iter().map(|i| format!("turn {}: {}", turn.index, i)));
        }
        Ok(issues)
    }
}

fn degrade<T>(source: &str, e: AgentError) -> Vec<T> {
    warn!("{} unavailable, continuing without it: {}", source, e);
    Vec::new()
}
