//! Compliance checks for advisor output.
//!
//! Pattern rules for regulated financial promotion, applied to advisor text
//! after reasoning blocks are removed.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

use crate::agent::AgentResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplianceReport {
    pub issues: Vec<String>,
    pub passed: bool,
}

impl ComplianceReport {
    pub fn clean() -> Self {
        Self { issues: Vec::new(), passed: true }
    }

    fn flag(&mut self, issue: impl Into<String>) {
        self.passed = false;
        self.issues.push(issue.into());
    }
}

#[async_trait]
pub trait ComplianceValidator: Send + Sync {
    async fn validate(&self, text: &str) -> AgentResult<ComplianceReport>;
}

fn reasoning_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<think>.*?(?:</think>|\z)").ok()).as_ref()
}

fn dangling_close() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)\A.*</think>").ok()).as_ref()
}

/// Remove `<think>` blocks (any case), including an unterminated trailing
/// one. A dangling `</think>` drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    let without_blocks = match reasoning_block() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };

    match dangling_close() {
        Some(re) => re.replace(&without_blocks, "").trim().to_string(),
        None => without_blocks.trim().to_string(),
    }
}

/// Regex rules over advisor text
pub struct RuleBasedCompliance {
    patterns: Vec<(Regex, String)>,
}

impl Default for RuleBasedCompliance {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedCompliance {
    pub fn new() -> Self {
        Self { patterns: Self::build_patterns() }
    }

    fn build_patterns() -> Vec<(Regex, String)> {
        let table = [
            (
                r"(?i)\bguarantee[sd]?\b.{0,40}\b(?:returns?|growth|profits?|income|gains?)\b",
                "Promises guaranteed investment returns",
            ),
            (
                r"(?i)\b(?:risk[-\s]?free|no\s+risk|zero\s+risk|can(?:'|no)?t\s+lose|cannot\s+lose)\b",
                "Describes an investment as risk-free",
            ),
            (
                r"(?i)\b(?:act\s+now|today\s+only|limited[-\s]time\s+offer|before\s+it'?s\s+too\s+late|decide\s+right\s+now)\b",
                "Uses pressure-selling language",
            ),
            (
                r"(?i)\byou\s+(?:will|are\s+certain\s+to)\s+(?:definitely\s+)?(?:double|triple|get\s+rich|make\s+a\s+fortune)\b",
                "States speculative outcomes as certain",
            ),
            (
                r"(?i)\b(?:hide|conceal)\b.{0,30}\b(?:hmrc|the\s+taxman|tax\s+authorities)\b",
                "Suggests concealing income from tax authorities",
            ),
            (
                r"(?i)\b(?:unlock|release|cash\s+in)\b.{0,30}\bpension\b.{0,30}\bbefore\s+(?:age\s+)?55\b",
                "Promotes early pension release",
            ),
            (
                r"(?i)\bdon'?t\s+(?:need|bother)\s+(?:to\s+)?(?:read|check)\s+the\s+(?:terms|small\s+print|key\s+information)\b",
                "Discourages reading product disclosures",
            ),
        ];

        table
            .iter()
            .filter_map(|(pattern, description)| match Regex::new(pattern) {
                Ok(re) => Some((re, description.to_string())),
                Err(e) => {
                    warn!("Skipping invalid compliance pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect()
    }

    pub fn check(&self, text: &str) -> ComplianceReport {
        let visible = strip_reasoning(text);
        let mut report = ComplianceReport::clean();

        for (pattern, description) in &self.patterns {
            if let Some(m) = pattern.find(&visible) {
                report.flag(format!("{}: \"{}\"", description, m.as_str()));
            }
        }
        report
    }
}

#[async_trait]
impl ComplianceValidator for RuleBasedCompliance {
    async fn validate(&self, text: &str) -> AgentResult<ComplianceReport> {
        Ok(self.check(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_reasoning_variants() {
        assert_eq!(strip_reasoning("<think>plan</think>Hello"), "Hello");
        assert_eq!(strip_reasoning("<THINK>\nplan\n</Think>\n  Hello "), "Hello");
        assert_eq!(strip_reasoning("Answer first <think>unfinished"), "Answer first");
        assert_eq!(strip_reasoning("a<think>x</think>b<think>y</think>c"), "abc");
        assert_eq!(strip_reasoning("leaked plan</think>Visible"), "Visible");
        assert_eq!(strip_reasoning("no reasoning here"), "no reasoning here");
    }

    #[test]
    fn test_strip_reasoning_keeps_non_ascii_text_intact() {
        assert_eq!(strip_reasoning("ɐ plan é</THINK>Größe ı"), "Größe ı");
        assert_eq!(strip_reasoning("<think>İ</think>Ångström fees"), "Ångström fees");
        assert_eq!(strip_reasoning("ßß no tags ı"), "ßß no tags ı");
    }

    #[test]
    fn test_flags_guaranteed_and_risk_free() {
        let validator = RuleBasedCompliance::new();
        let report = validator.check("This fund is risk-free and we guarantee 8% returns every year.");
        assert!(!report.passed);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_reasoning_is_not_judged() {
        let validator = RuleBasedCompliance::new();
        let report = validator.check("<think>I must not say it's risk-free</think>All investments carry risk.");
        assert!(report.passed, "{:?}", report.issues);
    }

    #[tokio::test]
    async fn test_balanced_advice_passes() {
        let validator = RuleBasedCompliance::new();
        let report = validator
            .validate("The value of investments can go down as well as up. Let's review your attitude to risk.")
            .await
            .unwrap();
        assert_eq!(report, ComplianceReport::clean());
    }
}
