//! Consultation lifecycle against scripted policies.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use advisory_agency::agent::{
    AgentResult, CustomerAssessment, CustomerContext, CustomerPolicy, CustomerProfile, CustomerReply, Speaker,
};
use advisory_agency::memory::{GuidanceRule, InMemoryCaseStore, InMemoryRuleStore, RuleStore};
use advisory_agency::orchestrator::{
    AgencyEvent, EventBus, Orchestrator, OutcomeStatus, RetrievalSources, TerminationReason, Turn,
};

use common::{config, embed_words, engine, profile, FailingAdvisor, ScriptedAdvisor, ScriptedCustomer};

fn orchestrator(rules: Arc<InMemoryRuleStore>) -> Orchestrator {
    Orchestrator::new(engine(), Arc::new(InMemoryCaseStore::new()), rules, &config())
}

#[tokio::test]
async fn test_runs_to_turn_budget_when_nobody_ends() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor::new("Let's look at your pensions together.");
    let customer = ScriptedCustomer::new(profile("c1", "I have three old pensions."));

    let result = orch.run(&advisor, &customer, 5).await;

    assert_eq!(result.transcript.len(), 5);
    assert_eq!(result.outcome.turns_used, 5);
    assert_eq!(result.outcome.termination, TerminationReason::MaxTurnsReached);
    assert_eq!(result.outcome.status, OutcomeStatus::Incomplete);
    assert!(!result.outcome.successful);

    let speakers: Vec<Speaker> = result.transcript.iter().map(|t| t.speaker).collect();
    assert_eq!(
        speakers,
        vec![Speaker::Advisor, Speaker::Customer, Speaker::Advisor, Speaker::Customer, Speaker::Advisor]
    );
}

#[tokio::test]
async fn test_customer_ending_with_acceptance_succeeds() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor::new("Consolidating the two smaller pots would cut your fees.");
    let customer = ScriptedCustomer::new(profile("c2", "I have three old pensions."))
        .ending_after(2)
        .accepting_when("cut your fees");

    let outcome = orch.run_consultation(&advisor, &customer, 12).await;

    assert_eq!(outcome.termination, TerminationReason::CustomerEnded);
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.turns_used, 4);
    assert!(outcome.successful);
    assert!(outcome.customer_satisfaction > 0.5);
}

#[tokio::test]
async fn test_resolving_advisor_gets_one_closing_reply() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor { line: "That covers everything. [RESOLVED]".to_string(), resolve: true };
    let customer = ScriptedCustomer::new(profile("c3", "Quick question about my ISA.")).accepting_when("covers everything");

    let result = orch.run(&advisor, &customer, 10).await;

    assert_eq!(result.outcome.termination, TerminationReason::AdvisorResolved);
    assert_eq!(result.transcript.len(), 2);
    assert_eq!(result.transcript[1].speaker, Speaker::Customer);
    assert!(result.outcome.successful);
}

#[tokio::test]
async fn test_non_compliant_advice_is_not_successful() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor::new("This fund has guaranteed returns of 12% a year.");
    let customer = ScriptedCustomer::new(profile("c4", "Where should I invest?"))
        .ending_after(1)
        .accepting_when("guaranteed");

    let outcome = orch.run_consultation(&advisor, &customer, 6).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.customer_accepted);
    assert!(!outcome.compliance_issues.is_empty());
    assert!(!outcome.successful);
}

#[tokio::test]
async fn test_provider_failure_marks_run_failed() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let customer = ScriptedCustomer::new(profile("c5", "Hello?"));

    let outcome = orch.run_consultation(&FailingAdvisor, &customer, 6).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(matches!(outcome.termination, TerminationReason::ProviderFailure(ref m) if m.contains("connection refused")));
    assert_eq!(outcome.turns_used, 0);
    assert!(!outcome.successful);
}

#[tokio::test]
async fn test_customer_pause_moves_virtual_clock() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor::new("Take some time to find your statements.");
    let customer = ScriptedCustomer::new(profile("c6", "Can you review my pensions?"))
        .ending_after(2)
        .pausing(chrono::Duration::days(3));

    let result = orch.run(&advisor, &customer, 8).await;

    let elapsed = result.ended_at - result.started_at;
    assert!(elapsed >= chrono::Duration::days(6), "elapsed {:?}", elapsed);
    assert!(result.transcript.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test]
async fn test_rules_are_retrieved_and_recorded_as_applied() {
    let rules = Arc::new(InMemoryRuleStore::new());
    let principle = "Ask about existing pensions before recommending a transfer";
    let rule = GuidanceRule::new(principle, "pension", embed_words(principle), 0.5);
    tokio_test::assert_ok!(rules.insert(rule.clone()).await);

    let advisor = ScriptedAdvisor::new("Which pensions do you already hold?");
    let customer = ScriptedCustomer::new(profile("c7", "Should I transfer my pension?"));

    let with_rules = orchestrator(rules.clone()).run(&advisor, &customer, 3).await;
    assert_eq!(with_rules.applied_rule_ids, vec![rule.id]);

    let without = orchestrator(rules)
        .with_sources(RetrievalSources { rules: false, ..RetrievalSources::all() })
        .run(&advisor, &customer, 3)
        .await;
    assert!(without.applied_rule_ids.is_empty());
}

#[tokio::test]
async fn test_events_cover_the_consultation() {
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.subscribe();
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new())).with_events(bus.clone());

    let advisor = ScriptedAdvisor::new("Hello.");
    let customer = ScriptedCustomer::new(profile("c8", "Hi.")).ending_after(1);
    let result = orch.run(&advisor, &customer, 4).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(AgencyEvent::ConsultationStarted { customer, .. }) if customer == "c8"));
    let turns = events.iter().filter(|e| matches!(e, AgencyEvent::TurnCompleted { .. })).count();
    assert_eq!(turns, result.transcript.len());
    assert!(matches!(
        events.last(),
        Some(AgencyEvent::ConsultationFinished { consultation, termination: TerminationReason::CustomerEnded, .. })
            if *consultation == result.id
    ));
}

/// Records every advisor text the customer side is handed.
struct RecordingCustomer {
    profile: CustomerProfile,
    seen: Mutex<Vec<String>>,
}

impl RecordingCustomer {
    fn note(&self, transcript: &[Turn]) {
        let mut seen = self.seen.lock().unwrap();
        for turn in transcript.iter().filter(|t| t.speaker == Speaker::Advisor) {
            seen.push(turn.content.clone());
            seen.push(turn.visible.clone());
        }
    }
}

#[async_trait]
impl CustomerPolicy for RecordingCustomer {
    fn profile(&self) -> &CustomerProfile {
        &self.profile
    }

    async fn respond(&self, ctx: &CustomerContext) -> AgentResult<CustomerReply> {
        self.note(&ctx.transcript);
        self.seen.lock().unwrap().push(ctx.latest_advisor.clone());
        Ok(CustomerReply { text: "Tell me more.".into(), ends: ctx.transcript.len() >= 3, pause: None })
    }

    async fn assess(&self, transcript: &[Turn]) -> AgentResult<CustomerAssessment> {
        self.note(transcript);
        Ok(CustomerAssessment { satisfaction: 0.5, accepted: false })
    }
}

#[tokio::test]
async fn test_customer_never_sees_advisor_reasoning() {
    let orch = orchestrator(Arc::new(InMemoryRuleStore::new()));
    let advisor = ScriptedAdvisor::new("<think>upsell the premium fund</think>How can I help?");
    let customer = RecordingCustomer { profile: profile("c9", "I want to save for a house."), seen: Mutex::new(Vec::new()) };

    let result = orch.run(&advisor, &customer, 6).await;

    // The stored transcript keeps the raw text.
    assert!(result.transcript[0].content.contains("premium fund"));

    let seen = customer.seen.lock().unwrap();
    assert!(!seen.is_empty());
    for text in seen.iter() {
        assert_eq!(text, "How can I help?");
    }
}
