//! Memory node types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::retrieval::Retrievable;

/// What a memory node records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Observation,
    Reflection,
    Plan,
}

/// A single entry in a consultation's working memory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryNode {
    pub id: Uuid,
    pub kind: MemoryKind,
    pub content: String,
    /// Importance score (0.0 - 1.0)
    pub importance: f32,
    /// Virtual time of creation
    pub created_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
    /// Times this node was returned by retrieval
    pub access_count: u32,
}

impl MemoryNode {
    pub fn new(kind: MemoryKind, content: impl Into<String>, created_at: DateTime<Utc>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            importance: 0.5,
            created_at,
            embedding,
            access_count: 0,
        }
    }

    pub fn observation(content: impl Into<String>, created_at: DateTime<Utc>, embedding: Vec<f32>) -> Self {
        Self::new(MemoryKind::Observation, content, created_at, embedding)
    }

    /// Set importance score
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }
}

impl Retrievable for MemoryNode {
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}
