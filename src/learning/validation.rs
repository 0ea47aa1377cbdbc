//! Candidate principle validation.
//!
//! A candidate is checked against the active rules of its category. It is
//! blocked when it restates an existing rule (embedding similarity at or
//! above the threshold) or directly contradicts one (shared topic plus an
//! opposing word pair or negation on one side only).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::memory::{similarity, GuidanceRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PrincipleVerdict {
    Novel,
    Redundant { rule_id: Uuid, similarity: f32 },
    Contradicts { rule_id: Uuid, overlap: f64 },
}

impl PrincipleVerdict {
    pub fn is_novel(&self) -> bool {
        matches!(self, PrincipleVerdict::Novel)
    }
}

const OPPOSITION_PAIRS: &[(&str, &str)] = &[
    ("always", "never"),
    ("should", "shouldn't"),
    ("recommend", "discourage"),
    ("increase", "decrease"),
    ("include", "exclude"),
    ("before", "after"),
    ("more", "less"),
    ("accept", "reject"),
    ("early", "late"),
    ("high", "low"),
    ("encourage", "discourage"),
];

const NEGATION_WORDS: &[&str] = &[
    "not", "don't", "doesn't", "never", "no", "won't", "can't", "shouldn't", "avoid", "without",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "it", "its", "of", "in", "to", "for", "on", "at", "by", "with", "from", "this", "that", "and",
    "or", "but", "their", "they", "customer", "customers", "adviser", "advisor",
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn topic_tokens(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()) && !NEGATION_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard overlap of content words.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let (ta, tb) = (topic_tokens(a), topic_tokens(b));
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

fn has_opposition(a: &str, b: &str) -> bool {
    let (wa, wb): (HashSet<String>, HashSet<String>) = (words(a).into_iter().collect(), words(b).into_iter().collect());
    OPPOSITION_PAIRS.iter().any(|(x, y)| {
        (wa.contains(*x) && wb.contains(*y) && !wa.contains(*y)) || (wa.contains(*y) && wb.contains(*x) && !wa.contains(*x))
    })
}

fn has_negation_asymmetry(a: &str, b: &str) -> bool {
    let negated = |t: &str| words(t).iter().any(|w| NEGATION_WORDS.contains(&w.as_str()));
    negated(a) != negated(b)
}

/// Two principles on the same topic that pull in opposite directions.
pub fn contradicts(a: &str, b: &str) -> Option<f64> {
    let overlap = word_overlap(a, b);
    if overlap < 0.3 {
        return None;
    }
    (has_opposition(a, b) || has_negation_asymmetry(a, b)).then_some(overlap)
}

/// Check a candidate against the active rules of its category.
pub fn validate_principle(
    principle: &str,
    embedding: &[f32],
    category: &str,
    rules: &[GuidanceRule],
    redundancy_threshold: f32,
) -> PrincipleVerdict {
    let peers = rules
        .iter()
        .filter(|r| r.is_active() && r.category.eq_ignore_ascii_case(category));

    let mut redundant: Option<(Uuid, f32)> = None;
    for rule in peers {
        if let Some(overlap) = contradicts(principle, &rule.principle) {
            return PrincipleVerdict::Contradicts { rule_id: rule.id, overlap };
        }
        let sim = similarity(embedding, &rule.embedding);
        if sim >= redundancy_threshold && redundant.map_or(true, |(_, best)| sim > best) {
            redundant = Some((rule.id, sim));
        }
    }

    match redundant {
        Some((rule_id, similarity)) => PrincipleVerdict::Redundant { rule_id, similarity },
        None => PrincipleVerdict::Novel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RuleState;

    fn rule(principle: &str, category: &str, embedding: Vec<f32>) -> GuidanceRule {
        GuidanceRule::new(principle, category, embedding, 0.5)
    }

    #[test]
    fn test_near_duplicate_is_redundant() {
        let existing = rule("Ask about the retirement date before discussing drawdown", "retirement", vec![1.0, 0.0]);
        let verdict = validate_principle(
            "Confirm the planned retirement date first",
            &[0.99, 0.05],
            "Retirement",
            &[existing.clone()],
            0.9,
        );
        assert_eq!(verdict, PrincipleVerdict::Redundant { rule_id: existing.id, similarity: similarity(&[0.99, 0.05], &[1.0, 0.0]) });
    }

    #[test]
    fn test_negated_restatement_contradicts() {
        let existing = rule("Always recommend consolidating small pension pots", "pension", vec![0.0, 1.0]);
        let verdict = validate_principle(
            "Never recommend consolidating small pension pots",
            &[1.0, 0.0],
            "pension",
            &[existing.clone()],
            0.9,
        );
        assert!(matches!(verdict, PrincipleVerdict::Contradicts { rule_id, .. } if rule_id == existing.id));
    }

    #[test]
    fn test_other_categories_and_deprecated_rules_do_not_block() {
        let other = rule("Never recommend consolidating small pension pots", "debt", vec![1.0, 0.0]);
        let mut dead = rule("Never recommend consolidating small pension pots", "pension", vec![1.0, 0.0]);
        dead.state = RuleState::Deprecated;

        let verdict = validate_principle(
            "Always recommend consolidating small pension pots",
            &[1.0, 0.0],
            "pension",
            &[other, dead],
            0.9,
        );
        assert!(verdict.is_novel());
    }

    #[test]
    fn test_unrelated_topics_do_not_contradict() {
        assert_eq!(contradicts("Never skip the affordability check", "Explain ISA allowances clearly"), None);
    }
}
