//! Case Base
//!
//! Append-only record of what worked: one case per successful consultation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::retrieval::{rank, Retrievable, Scored};
use crate::agent::{AgentError, AgentResult, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    pub id: Uuid,
    pub situation_summary: String,
    pub task_type: TaskType,
    pub action_taken: String,
    pub outcome_summary: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Consultation this case was learned from
    pub source_consultation: Uuid,
}

impl Case {
    /// Short form for advisor context.
    pub fn render(&self) -> String {
        format!(
            "[{}] Situation: {}\nWhat worked: {}\nOutcome: {}",
            self.task_type, self.situation_summary, self.action_taken, self.outcome_summary
        )
    }
}

impl Retrievable for Case {
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn category(&self) -> Option<&str> {
        Some(self.task_type.as_str())
    }
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Append a case; an existing id is rejected.
    async fn insert(&self, case: Case) -> AgentResult<()>;

    async fn get(&self, id: Uuid) -> AgentResult<Option<Case>>;

    async fn find_by_consultation(&self, consultation: Uuid) -> AgentResult<Option<Case>>;

    /// Every case, oldest first.
    async fn all(&self) -> AgentResult<Vec<Case>>;

    async fn count(&self) -> AgentResult<usize> {
        Ok(self.all().await?.len())
    }

    async fn search(&self, query: &[f32], k: usize, task_type: Option<TaskType>) -> AgentResult<Vec<Scored<Case>>> {
        let cases = self.all().await?;
        Ok(rank(query, &cases, k, task_type.map(|t| t.as_str())))
    }
}

#[derive(Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<Vec<Case>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cases(cases: Vec<Case>) -> Self {
        Self { cases: RwLock::new(cases) }
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn insert(&self, case: Case) -> AgentResult<()> {
        let mut cases = self.cases.write().await;
        if cases.iter().any(|c| c.id == case.id) {
            return Err(AgentError::DuplicateId { kind: "case", id: case.id.to_string() });
        }
        cases.push(case);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AgentResult<Option<Case>> {
        Ok(self.cases.read().await.iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_consultation(&self, consultation: Uuid) -> AgentResult<Option<Case>> {
        Ok(self
            .cases
            .read()
            .await
            .iter()
            .find(|c| c.source_consultation == consultation)
            .cloned())
    }

    async fn all(&self) -> AgentResult<Vec<Case>> {
        Ok(self.cases.read().await.clone())
    }

    async fn count(&self) -> AgentResult<usize> {
        Ok(self.cases.read().await.len())
    }
}
