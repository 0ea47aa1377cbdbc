//! Rule Base
//!
//! Guidance rules learned from failures. Rules are mutated in place
//! (confidence, counters, state), so every write after insert goes through
//! an optimistic compare-and-swap on `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::retrieval::{rank, Retrievable, Scored};
use crate::agent::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Active,
    Deprecated,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleState::Active => "active",
            RuleState::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deprecated" => RuleState::Deprecated,
            _ => RuleState::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuidanceRule {
    pub id: Uuid,
    pub principle: String,
    pub category: String,
    pub embedding: Vec<f32>,
    pub confidence: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub state: RuleState,
    /// Bumped on every successful write
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl GuidanceRule {
    pub fn new(principle: impl Into<String>, category: impl Into<String>, embedding: Vec<f32>, prior: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            principle: principle.into(),
            category: category.into(),
            embedding,
            confidence: prior.clamp(0.0, 1.0),
            success_count: 0,
            failure_count: 0,
            state: RuleState::Active,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RuleState::Active
    }

    pub fn render(&self) -> String {
        format!("({:.2}) [{}] {}", self.confidence, self.category, self.principle)
    }
}

impl Retrievable for GuidanceRule {
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }

    fn is_retrievable(&self) -> bool {
        self.is_active()
    }
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert(&self, rule: GuidanceRule) -> AgentResult<()>;

    async fn get(&self, id: Uuid) -> AgentResult<Option<GuidanceRule>>;

    /// Every rule including deprecated ones, oldest first.
    async fn all(&self) -> AgentResult<Vec<GuidanceRule>>;

    /// Replace the stored rule with `next` only if the stored version is
    /// still `expected_version`. `Ok(false)` means another writer got there first.
    async fn compare_and_swap(&self, next: &GuidanceRule, expected_version: u64) -> AgentResult<bool>;

    async fn active(&self) -> AgentResult<Vec<GuidanceRule>> {
        Ok(self.all().await?.into_iter().filter(|r| r.is_active()).collect())
    }

    /// Top-k active rules; deprecated rules never appear.
    async fn search(&self, query: &[f32], k: usize, category: Option<&str>) -> AgentResult<Vec<Scored<GuidanceRule>>> {
        let rules = self.all().await?;
        Ok(rank(query, &rules, k, category))
    }
}

#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<GuidanceRule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<GuidanceRule>) -> Self {
        Self { rules: RwLock::new(rules) }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn insert(&self, rule: GuidanceRule) -> AgentResult<()> {
        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(AgentError::DuplicateId { kind: "rule", id: rule.id.to_string() });
        }
        rules.push(rule);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AgentResult<Option<GuidanceRule>> {
        Ok(self.rules.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn all(&self) -> AgentResult<Vec<GuidanceRule>> {
        Ok(self.rules.read().await.clone())
    }

    async fn compare_and_swap(&self, next: &GuidanceRule, expected_version: u64) -> AgentResult<bool> {
        let mut rules = self.rules.write().await;
        let slot = rules
            .iter_mut()
            .find(|r| r.id == next.id)
            .ok_or_else(|| AgentError::NotFound { kind: "rule", id: next.id.to_string() })?;

        if slot.version != expected_version {
            return Ok(false);
        }
        *slot = next.clone();
        slot.version = expected_version + 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = InMemoryRuleStore::new();
        let rule = GuidanceRule::new("Ask about retirement age first", "pension", vec![1.0, 0.0], 0.5);
        store.insert(rule.clone()).await.unwrap();

        let mut a = rule.clone();
        a.success_count = 1;
        assert!(store.compare_and_swap(&a, 0).await.unwrap());

        let mut b = rule.clone();
        b.failure_count = 1;
        assert!(!store.compare_and_swap(&b, 0).await.unwrap());

        let stored = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!((stored.success_count, stored.failure_count), (1, 0));
    }

    #[tokio::test]
    async fn test_search_excludes_deprecated() {
        let store = InMemoryRuleStore::new();
        let mut dead = GuidanceRule::new("Push the premium product", "investment", vec![1.0, 0.0], 0.5);
        dead.state = RuleState::Deprecated;
        store.insert(dead).await.unwrap();
        store
            .insert(GuidanceRule::new("Check capacity for loss", "investment", vec![0.6, 0.4], 0.5))
            .await
            .unwrap();

        let found = store.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.iter().all(|s| s.item.is_active()));
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cas_unknown_rule_is_not_found() {
        let store = InMemoryRuleStore::new();
        let ghost = GuidanceRule::new("x", "y", vec![1.0], 0.5);
        let err = store.compare_and_swap(&ghost, 0).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }
}
