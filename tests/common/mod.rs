//! Shared mocks for the integration suites.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use advisory_agency::agent::{
    AdvisorContext, AdvisorPolicy, AdvisorReply, AgentError, AgentResult, CustomerAssessment, CustomerContext,
    CustomerPolicy, CustomerProfile, CustomerReply, Generator, LLMProvider, Reflector, RetryPolicy, Speaker,
};
use advisory_agency::config::AgencyConfig;
use advisory_agency::memory::{EmbeddingProvider, RetrievalEngine};
use advisory_agency::orchestrator::Turn;

pub const DIM: usize = 32;

pub fn config() -> AgencyConfig {
    let mut config = AgencyConfig::default();
    config.retrieval.dimension = DIM;
    config.consultation.clock_start = Some("2026-01-05T09:00:00Z".to_string());
    config.learning.max_update_attempts = 1_000;
    config.evaluation.workers = 2;
    config.evaluation.run_timeout_secs = 1;
    config
}

/// Bag-of-words embedding: each word bumps one bucket.
pub struct KeywordEmbedder;

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let bucket = word.to_lowercase().bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize)) % DIM;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_words(t)).collect())
    }
}

pub fn engine() -> Arc<RetrievalEngine> {
    Arc::new(RetrievalEngine::new(Arc::new(KeywordEmbedder), &config().retrieval).with_retry(RetryPolicy::immediate()))
}

pub const PRINCIPLE: &str = "Confirm the customer's attitude to risk before recommending any investment";

/// Routes reflection prompts to canned, well-formed answers.
pub struct SmartMockProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
}

impl SmartMockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        }
    }
}

#[async_trait]
impl LLMProvider for SmartMockProvider {
    async fn generate(&self, _model: &str, prompt: String, _system: Option<String>) -> Result<String> {
        if let Some(queued) = self.responses.lock().await.pop_front() {
            return Ok(queued);
        }

        let p = prompt.to_lowercase();
        debug!("MOCK PROMPT: {}", p);

        if p.contains("did not succeed") {
            return Ok(format!("<think>The adviser skipped the risk questions.</think>\nPRINCIPLE: {}\nCATEGORY: Investment", PRINCIPLE));
        }
        if p.contains("rewrite this guidance") {
            return Ok(format!("REFINED: {}", PRINCIPLE));
        }
        if p.contains("would this rule improve") {
            return Ok("SCORE: 8\nVERDICT: accept".to_string());
        }
        if p.contains("classify this financial advice") {
            return Ok("pension".to_string());
        }
        if p.contains("summarise this successful") {
            return Ok("SITUATION: Customer with three small pensions wants to consolidate\n\
                       ACTION: Compared fees and transfer penalties before recommending\n\
                       OUTCOME: Customer agreed to consolidate two of the three"
                .to_string());
        }
        if p.contains("reviewing a financial advice consultation") {
            let verdict = if p.contains("i accept") { "success" } else { "failure" };
            return Ok(format!("VERDICT: {}\nCONFIDENCE: 0.8", verdict));
        }

        Ok("I understand.".to_string())
    }
}

pub fn reflector() -> Reflector {
    let generator = Generator::new(Arc::new(SmartMockProvider::new(vec![])), "mock").with_retry(RetryPolicy::immediate());
    Reflector::new(generator)
}

pub fn profile(id: &str, brief: &str) -> CustomerProfile {
    CustomerProfile {
        id: id.to_string(),
        name: format!("Customer {}", id),
        brief: brief.to_string(),
        ..Default::default()
    }
}

/// Advisor that repeats one line, optionally resolving.
pub struct ScriptedAdvisor {
    pub line: String,
    pub resolve: bool,
}

impl ScriptedAdvisor {
    pub fn new(line: &str) -> Self {
        Self { line: line.to_string(), resolve: false }
    }
}

#[async_trait]
impl AdvisorPolicy for ScriptedAdvisor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(&self, _ctx: &AdvisorContext) -> AgentResult<AdvisorReply> {
        Ok(AdvisorReply { text: self.line.clone(), resolved: self.resolve })
    }
}

/// Advisor whose answer depends on whether learned rules reached it.
pub struct RuleFollowingAdvisor;

#[async_trait]
impl AdvisorPolicy for RuleFollowingAdvisor {
    fn name(&self) -> &str {
        "rule_following"
    }

    async fn respond(&self, ctx: &AdvisorContext) -> AgentResult<AdvisorReply> {
        let text = if ctx.rules.is_empty() {
            "Put it all in the fund we discussed.".to_string()
        } else {
            "Before anything else, how would you feel if the investment fell by a fifth?".to_string()
        };
        Ok(AdvisorReply { text, resolved: false })
    }
}

pub struct FailingAdvisor;

#[async_trait]
impl AdvisorPolicy for FailingAdvisor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn respond(&self, _ctx: &AdvisorContext) -> AgentResult<AdvisorReply> {
        Err(AgentError::Provider {
            call: "advisor".into(),
            turn: None,
            attempts: 3,
            message: "connection refused".into(),
        })
    }
}

/// Customer that ends after `end_after` replies (never, if `None`) and
/// accepts when any advisor turn contains `accept_when`.
pub struct ScriptedCustomer {
    pub profile: CustomerProfile,
    pub end_after: Option<usize>,
    pub accept_when: String,
    pub pause: Option<chrono::Duration>,
    pub stall: Option<Duration>,
}

impl ScriptedCustomer {
    pub fn new(profile: CustomerProfile) -> Self {
        Self {
            profile,
            end_after: None,
            accept_when: String::new(),
            pause: None,
            stall: None,
        }
    }

    pub fn ending_after(mut self, replies: usize) -> Self {
        self.end_after = Some(replies);
        self
    }

    pub fn accepting_when(mut self, phrase: &str) -> Self {
        self.accept_when = phrase.to_string();
        self
    }

    pub fn pausing(mut self, pause: chrono::Duration) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn stalling(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }
}

#[async_trait]
impl CustomerPolicy for ScriptedCustomer {
    fn profile(&self) -> &CustomerProfile {
        &self.profile
    }

    async fn respond(&self, ctx: &CustomerContext) -> AgentResult<CustomerReply> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        let n = ctx.transcript.iter().filter(|t| t.speaker == Speaker::Customer).count() + 1;
        Ok(CustomerReply {
            text: format!("Reply {} from {}", n, self.profile.name),
            ends: self.end_after.is_some_and(|limit| n >= limit),
            pause: self.pause,
        })
    }

    async fn assess(&self, transcript: &[Turn]) -> AgentResult<CustomerAssessment> {
        let accepted = !self.accept_when.is_empty() && transcript.iter().any(|t| t.visible.contains(&self.accept_when));
        Ok(CustomerAssessment {
            satisfaction: if accepted { 0.9 } else { 0.3 },
            accepted,
        })
    }
}
