//! Advisor and customer policies.
//!
//! A policy turns the visible state of a consultation into its next
//! utterance. The LLM-backed implementations talk through a [`Generator`]
//! and signal control flow with inline markers: `[RESOLVED]` from the
//! advisor, `[END]` and `[PAUSE n days]` from the customer.

use async_trait::async_trait;
use chrono::Duration;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use super::{AgentError, AgentResult, Generator};
use crate::memory::{Case, GuidanceRule, KnowledgeEntry, MemoryNode, Scored};
use crate::orchestrator::outcome::{render_turns, Turn};
use crate::safety::strip_reasoning;

pub const RESOLVED_MARKER: &str = "[RESOLVED]";
pub const END_MARKER: &str = "[END]";

/// Everything the advisor may look at before speaking
#[derive(Debug, Clone, Default)]
pub struct AdvisorContext {
    pub brief: String,
    pub transcript: Vec<Turn>,
    /// Human form, e.g. "3 weeks"
    pub elapsed: String,
    pub turns_remaining: usize,
    pub cases: Vec<Scored<Case>>,
    pub rules: Vec<Scored<GuidanceRule>>,
    pub memories: Vec<Scored<MemoryNode>>,
    pub knowledge: Vec<Scored<KnowledgeEntry>>,
}

impl AdvisorContext {
    pub fn render(&self) -> String {
        let mut out = format!("## Customer brief\n{}\n", self.brief);
        out.push_str(&format!(
            "\nTime since the consultation began: {}. Turns remaining: {}.\n",
            self.elapsed, self.turns_remaining
        ));

        if !self.rules.is_empty() {
            out.push_str("\n## Guidance learned from past mistakes\n");
            for r in &self.rules {
                out.push_str(&format!("- {}\n", r.item.render()));
            }
        }
        if !self.cases.is_empty() {
            out.push_str("\n## Similar past consultations that went well\n");
            for c in &self.cases {
                out.push_str(&format!("- {}\n", c.item.render().replace('\n', "\n  ")));
            }
        }
        if !self.knowledge.is_empty() {
            out.push_str("\n## Reference material\n");
            for k in &self.knowledge {
                out.push_str(&format!("- {}\n", k.item.render()));
            }
        }
        if !self.memories.is_empty() {
            out.push_str("\n## Relevant notes from this consultation\n");
            for m in &self.memories {
                out.push_str(&format!("- {}\n", m.item.content));
            }
        }

        out.push_str("\n## Conversation so far\n");
        if self.transcript.is_empty() {
            out.push_str("(no messages yet; you open the conversation)\n");
        } else {
            out.push_str(&render_turns(&self.transcript));
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorReply {
    pub text: String,
    pub resolved: bool,
}

#[async_trait]
pub trait AdvisorPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, ctx: &AdvisorContext) -> AgentResult<AdvisorReply>;
}

/// Simulated customer persona
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomerProfile {
    pub id: String,
    pub name: String,
    /// Opening message handed to the advisor
    pub brief: String,
    #[serde(default)]
    pub situation: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub personality: String,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerContext {
    /// Advisor turns carry only their visible text
    pub transcript: Vec<Turn>,
    pub latest_advisor: String,
    pub elapsed: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerReply {
    pub text: String,
    pub ends: bool,
    pub pause: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomerAssessment {
    /// 0.0 - 1.0
    pub satisfaction: f32,
    pub accepted: bool,
}

#[async_trait]
pub trait CustomerPolicy: Send + Sync {
    fn profile(&self) -> &CustomerProfile;

    async fn respond(&self, ctx: &CustomerContext) -> AgentResult<CustomerReply>;

    /// Judge the finished consultation from the customer's side.
    async fn assess(&self, transcript: &[Turn]) -> AgentResult<CustomerAssessment>;
}

fn pause_marker() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[\s*PAUSE\s+(\d+)\s*(hours?|days?|weeks?)?\s*\]").ok())
        .as_ref()
}

/// Remove `marker` (any case); report whether it was present.
fn take_marker(text: &str, marker: &str) -> (String, bool) {
    let re = match RegexBuilder::new(&regex::escape(marker)).case_insensitive(true).build() {
        Ok(re) => re,
        Err(_) => return (text.to_string(), text.contains(marker)),
    };
    if !re.is_match(text) {
        return (text.to_string(), false);
    }
    (re.replace_all(text, "").trim().to_string(), true)
}

/// Strip `[RESOLVED]`; markers inside reasoning do not count.
pub fn parse_advisor_output(raw: &str) -> AdvisorReply {
    let (_, resolved) = take_marker(&strip_reasoning(raw), RESOLVED_MARKER);
    let (text, _) = take_marker(raw, RESOLVED_MARKER);
    AdvisorReply { text, resolved }
}

/// Strip `[END]` and `[PAUSE n days]` markers.
pub fn parse_customer_output(raw: &str) -> CustomerReply {
    let visible = strip_reasoning(raw);
    let (mut text, ends) = take_marker(&visible, END_MARKER);

    let mut pause = None;
    if let Some(re) = pause_marker() {
        if let Some(caps) = re.captures(&text) {
            let n: i64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_else(|| "days".into());
            pause = Some(if unit.starts_with("hour") {
                Duration::hours(n)
            } else if unit.starts_with("week") {
                Duration::weeks(n)
            } else {
                Duration::days(n)
            });
            text = re.replace_all(&text, "").trim().to_string();
        }
    }

    CustomerReply { text, ends, pause }
}

const ADVISOR_SYSTEM: &str = "You are a regulated financial adviser. Give clear, balanced, suitable advice. \
Ask about the customer's circumstances before recommending anything. Never promise returns or describe \
investments as risk-free. When the customer's need has been fully addressed, end your message with [RESOLVED].";

pub struct LlmAdvisor {
    name: String,
    generator: Generator,
    system_prompt: String,
}

impl LlmAdvisor {
    pub fn new(name: impl Into<String>, generator: Generator) -> Self {
        Self {
            name: name.into(),
            generator,
            system_prompt: ADVISOR_SYSTEM.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl AdvisorPolicy for LlmAdvisor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, ctx: &AdvisorContext) -> AgentResult<AdvisorReply> {
        let prompt = format!("{}\nWrite your next message to the customer.", ctx.render());
        let raw = self
            .generator
            .generate("advisor", prompt, Some(self.system_prompt.clone()))
            .await?;
        let reply = parse_advisor_output(&raw);
        if strip_reasoning(&reply.text).is_empty() {
            return Err(AgentError::malformed("advisor", raw));
        }
        Ok(reply)
    }
}

pub struct LlmCustomer {
    profile: CustomerProfile,
    generator: Generator,
}

impl LlmCustomer {
    pub fn new(profile: CustomerProfile, generator: Generator) -> Self {
        Self { profile, generator }
    }

    fn persona(&self) -> String {
        let p = &self.profile;
        format!(
            "You are role-playing {}, a customer speaking to a financial adviser.\n\
             Situation: {}\nGoals: {}\nPersonality: {}\n\
             Stay in character and reply briefly. If you need time away (e.g. to gather documents), \
             write [PAUSE n days]. When you are done with the conversation, end your message with [END].",
            p.name,
            p.situation,
            if p.goals.is_empty() { "(unspecified)".to_string() } else { p.goals.join("; ") },
            if p.personality.is_empty() { "ordinary" } else { p.personality.as_str() },
        )
    }

    fn parse_assessment(response: &str) -> AgentResult<CustomerAssessment> {
        let upper = response.to_uppercase();

        let satisfaction = upper
            .find("SATISFACTION:")
            .and_then(|idx| {
                let rest = &upper[idx + "SATISFACTION:".len()..];
                rest.split(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .find(|s| !s.is_empty())
                    .and_then(|s| s.parse::<f32>().ok())
            })
            .ok_or_else(|| AgentError::malformed("customer_assess", response))?;

        let accepted = upper
            .find("DECISION:")
            .map(|idx| {
                let rest = upper[idx + "DECISION:".len()..].trim_start();
                rest.starts_with("ACCEPT") || rest.starts_with("YES") || rest.starts_with("PROCEED")
            })
            .ok_or_else(|| AgentError::malformed("customer_assess", response))?;

        // Scores come back on a 0-10 scale.
        let satisfaction = if satisfaction > 1.0 { satisfaction / 10.0 } else { satisfaction };
        Ok(CustomerAssessment { satisfaction: satisfaction.clamp(0.0, 1.0), accepted })
    }
}

#[async_trait]
impl CustomerPolicy for LlmCustomer {
    fn profile(&self) -> &CustomerProfile {
        &self.profile
    }

    async fn respond(&self, ctx: &CustomerContext) -> AgentResult<CustomerReply> {
        let prompt = format!(
            "Conversation so far ({} since it started):\n{}\n\nThe adviser just said:\n{}\n\nYour reply:",
            ctx.elapsed,
            render_turns(&ctx.transcript),
            ctx.latest_advisor
        );
        let raw = self.generator.generate("customer", prompt, Some(self.persona())).await?;
        Ok(parse_customer_output(&raw))
    }

    async fn assess(&self, transcript: &[Turn]) -> AgentResult<CustomerAssessment> {
        let prompt = format!(
            "The consultation is over. Transcript:\n{}\n\n\
             As the customer, rate how satisfied you are and whether you will act on the advice.\n\
             Format your response as:\nSATISFACTION: [0-10]\nDECISION: [accept/decline]",
            render_turns(transcript)
        );
        let response = self.generator.generate("customer_assess", prompt, Some(self.persona())).await?;
        debug!("Customer assessment: {}", response);
        Self::parse_assessment(&strip_reasoning(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisor_resolution_marker() {
        let reply = parse_advisor_output("Here is your plan. [resolved]");
        assert!(reply.resolved);
        assert_eq!(reply.text, "Here is your plan.");

        let hidden = parse_advisor_output("<think>maybe [RESOLVED] later</think>Tell me more about your pension.");
        assert!(!hidden.resolved);
    }

    #[test]
    fn test_markers_removed_from_non_ascii_text() {
        let reply = parse_advisor_output("İstanbul property fund, Größe noted. [RESOLVED]");
        assert!(reply.resolved);
        assert_eq!(reply.text, "İstanbul property fund, Größe noted.");

        let reply = parse_customer_output("Ça suffit, merci İ. [end]");
        assert!(reply.ends);
        assert_eq!(reply.text, "Ça suffit, merci İ.");
    }

    #[test]
    fn test_customer_markers() {
        let reply = parse_customer_output("Thanks, that's all I needed. [END]");
        assert!(reply.ends);
        assert_eq!(reply.text, "Thanks, that's all I needed.");
        assert!(reply.pause.is_none());

        let reply = parse_customer_output("Let me dig out my statements. [PAUSE 3 weeks]");
        assert_eq!(reply.pause, Some(Duration::weeks(3)));
        assert_eq!(reply.text, "Let me dig out my statements.");
        assert!(!reply.ends);

        assert_eq!(parse_customer_output("[pause 2]").pause, Some(Duration::days(2)));
    }

    #[test]
    fn test_parse_assessment() {
        let a = LlmCustomer::parse_assessment("SATISFACTION: 8/10\nDECISION: Accept").unwrap();
        assert!((a.satisfaction - 0.8).abs() < 1e-6);
        assert!(a.accepted);

        let d = LlmCustomer::parse_assessment("satisfaction: 0.3\ndecision: decline").unwrap();
        assert!(!d.accepted);

        assert!(matches!(
            LlmCustomer::parse_assessment("I liked it"),
            Err(AgentError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_context_render_mentions_elapsed_and_rules() {
        let ctx = AdvisorContext {
            brief: "I want to consolidate three pensions".into(),
            elapsed: "3 weeks".into(),
            turns_remaining: 4,
            rules: vec![Scored {
                item: GuidanceRule::new("Check for safeguarded benefits", "pension", vec![1.0], 0.5),
                score: 0.9,
            }],
            ..Default::default()
        };
        let text = ctx.render();
        assert!(text.contains("3 weeks"));
        assert!(text.contains("Check for safeguarded benefits"));
        assert!(text.contains("you open the conversation"));
    }
}
