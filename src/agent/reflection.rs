//! Reflection Module
//!
//! LLM calls that turn a finished consultation into reusable experience:
//! principles from failures, summaries and task labels from successes, and
//! a value judgement on candidate rules.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AgentError, AgentResult, Generator, TaskType};
use crate::orchestrator::ConsultationResult;
use crate::safety::strip_reasoning;

/// A principle proposed from a failed consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePrinciple {
    pub principle: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleValue {
    /// 0.0 - 1.0
    pub score: f64,
    pub accept: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationSummary {
    pub situation: String,
    pub action: String,
    pub outcome: String,
}

fn find_ignoring_case(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?
        .find(haystack)
        .map(|m| (m.start(), m.end()))
}

/// Text after `label` up to the first of `stops` (case-insensitive).
fn extract_field(response: &str, label: &str, stops: &[&str]) -> Option<String> {
    let (_, start) = find_ignoring_case(response, label)?;
    let rest = &response[start..];
    let end = stops
        .iter()
        .filter_map(|s| find_ignoring_case(rest, s).map(|(i, _)| i))
        .min()
        .unwrap_or(rest.len());

    let value = rest[..end].trim().trim_matches(|c| c == '[' || c == ']').trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Reflector for turning outcomes into experience
#[derive(Clone)]
pub struct Reflector {
    generator: Generator,
}

impl Reflector {
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    async fn ask(&self, call: &str, prompt: String) -> AgentResult<String> {
        debug!("{} prompt:\n{}", call, prompt);
        let raw = self.generator.generate(call, prompt, None).await?;
        Ok(strip_reasoning(&raw))
    }

    /// Propose one general principle that would have avoided the failure.
    pub async fn reflect_on_failure(&self, result: &ConsultationResult) -> AgentResult<CandidatePrinciple> {
        let issues = if result.outcome.compliance_issues.is_empty() {
            "none".to_string()
        } else {
            result.outcome.compliance_issues.join("; ")
        };
        let prompt = format!(
            r#"You are reviewing a financial advice consultation that did not succeed.

## Customer brief
{}

## Transcript
{}

## Outcome
Ended by: {:?}. Customer satisfaction: {:.2}. Customer accepted: {}. Compliance issues: {}.

## Task
State ONE general principle the adviser should follow next time to avoid this failure.
It must apply beyond this customer. Also give a one-word category for it
(e.g. pension, investment, protection, mortgage, debt, retirement, general).

Format your response as:
PRINCIPLE: [the principle]
CATEGORY: [category]
"#,
            result.brief,
            result.render_transcript(),
            result.outcome.termination,
            result.outcome.customer_satisfaction,
            result.outcome.customer_accepted,
            issues,
        );

        let response = self.ask("reflect_on_failure", prompt).await?;
        let principle = extract_field(&response, "PRINCIPLE:", &["CATEGORY:"]);
        let category = extract_field(&response, "CATEGORY:", &["PRINCIPLE:", "\n"]);

        match (principle, category) {
            (Some(principle), Some(category)) => Ok(CandidatePrinciple {
                principle,
                category: category.to_lowercase(),
            }),
            _ => Err(AgentError::malformed("reflect_on_failure", response)),
        }
    }

    /// Tighten a principle into one actionable sentence.
    pub async fn refine_principle(&self, candidate: &CandidatePrinciple) -> AgentResult<String> {
        let prompt = format!(
            r#"Rewrite this guidance for a financial adviser as one short, specific, actionable sentence.
Keep its meaning. Do not add new advice.

Category: {}
Guidance: {}

Format your response as:
REFINED: [the sentence]
"#,
            candidate.category, candidate.principle
        );

        let response = self.ask("refine_principle", prompt).await?;
        extract_field(&response, "REFINED:", &["\n\n"])
            .map(|s| s.lines().next().unwrap_or_default().trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::malformed("refine_principle", response))
    }

    /// Score how much a candidate rule would help future consultations.
    pub async fn judge_rule_value(&self, principle: &str, category: &str) -> AgentResult<RuleValue> {
        let prompt = format!(
            r#"Would this rule improve future financial advice consultations?
Reject rules that are vague, obvious, customer-specific, or non-compliant.

Category: {}
Rule: {}

Format your response as:
SCORE: [0-10]
VERDICT: [accept/reject]
"#,
            category, principle
        );

        let response = self.ask("judge_rule_value", prompt).await?;
        let score = extract_field(&response, "SCORE:", &["VERDICT:", "\n"])
            .and_then(|s| {
                s.split(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .find(|t| !t.is_empty())
                    .and_then(|t| t.parse::<f64>().ok())
            });
        let verdict = extract_field(&response, "VERDICT:", &["SCORE:", "\n"]);

        match (score, verdict) {
            (Some(score), Some(verdict)) => {
                let score = if score > 1.0 { score / 10.0 } else { score };
                Ok(RuleValue {
                    score: score.clamp(0.0, 1.0),
                    accept: verdict.to_lowercase().starts_with("accept"),
                })
            }
            _ => Err(AgentError::malformed("judge_rule_value", response)),
        }
    }

    /// Label what kind of advice the consultation was about.
    pub async fn classify_task(&self, result: &ConsultationResult) -> AgentResult<TaskType> {
        let options = TaskType::ALL
            .iter()
            .map(|t| format!("- {}: {}", t.as_str(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Classify this financial advice consultation into exactly one category.\n\n{}\n\n\
             Customer brief: {}\n\nAnswer with the category name only.",
            options, result.brief
        );

        let response = self.ask("classify_task", prompt).await?;
        let label = response.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        match TaskType::from_label(label) {
            Some(t) => Ok(t),
            None => {
                warn!("Unrecognised task label {:?}; using general", label);
                Ok(TaskType::General)
            }
        }
    }

    /// Condense a successful consultation into situation / action / outcome.
    pub async fn summarize_situation(&self, result: &ConsultationResult) -> AgentResult<SituationSummary> {
        let prompt = format!(
            r#"Summarise this successful financial advice consultation for future reference.

## Customer brief
{}

## Transcript
{}

Format your response as:
SITUATION: [the customer's circumstances and need, one or two sentences]
ACTION: [what the adviser did that worked]
OUTCOME: [how it ended]
"#,
            result.brief,
            result.render_transcript()
        );

        let response = self.ask("summarize_situation", prompt).await?;
        let situation = extract_field(&response, "SITUATION:", &["ACTION:", "OUTCOME:"])
            .ok_or_else(|| AgentError::malformed("summarize_situation", response.clone()))?;
        let action = extract_field(&response, "ACTION:", &["OUTCOME:", "SITUATION:"]).unwrap_or_default();
        let outcome = extract_field(&response, "OUTCOME:", &["SITUATION:", "ACTION:"])
            .unwrap_or_else(|| format!("customer satisfaction {:.2}", result.outcome.customer_satisfaction));

        Ok(SituationSummary { situation, action, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_field_stops_at_next_label() {
        let r = "PRINCIPLE: Confirm the customer's retirement date first.\nCATEGORY: Pension";
        assert_eq!(
            extract_field(r, "PRINCIPLE:", &["CATEGORY:"]).as_deref(),
            Some("Confirm the customer's retirement date first.")
        );
        assert_eq!(extract_field(r, "CATEGORY:", &["\n"]).as_deref(), Some("Pension"));
        assert_eq!(extract_field(r, "VERDICT:", &[]), None);
        assert_eq!(extract_field("principle: [ ]", "PRINCIPLE:", &[]), None);
    }

    #[test]
    fn test_extract_field_keeps_non_ascii_casing() {
        let r = "ɐPRINCIPLE:é advise ı\nCATEGORY: pension";
        assert_eq!(extract_field(r, "PRINCIPLE:", &["CATEGORY:"]).as_deref(), Some("é advise ı"));
        assert_eq!(extract_field(r, "CATEGORY:", &["\n"]).as_deref(), Some("pension"));

        let r = "Principle: İnform the customer about Größe of fees\ncategory: Investment";
        assert_eq!(
            extract_field(r, "PRINCIPLE:", &["CATEGORY:"]).as_deref(),
            Some("İnform the customer about Größe of fees")
        );
    }
}
