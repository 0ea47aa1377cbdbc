//! Static regulatory and domain knowledge.
//!
//! Read-only: loaded from YAML, embedded once, then only searched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::retrieval::{rank, Retrievable, RetrievalEngine, Scored};
use crate::agent::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub id: String,
    /// e.g. "regulation", "product", "domain"
    pub source: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl KnowledgeEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}: {}", self.source, self.title, self.content)
    }
}

impl Retrievable for KnowledgeEntry {
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn category(&self) -> Option<&str> {
        Some(&self.source)
    }
}

#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    async fn search(&self, query_embedding: &[f32], k: usize, filter: Option<&str>) -> AgentResult<Vec<Scored<KnowledgeEntry>>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticKnowledge {
    entries: Vec<KnowledgeEntry>,
}

impl StaticKnowledge {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Entries must already carry embeddings.
    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    /// Embed any entry missing a vector.
    pub async fn embed_with(entries: Vec<KnowledgeEntry>, engine: &RetrievalEngine) -> AgentResult<Self> {
        let mut entries = entries;
        let pending: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let texts: Vec<String> = pending
                .iter()
                .map(|&i| format!("{}\n{}", entries[i].title, entries[i].content))
                .collect();
            let vectors = engine.embed_batch(&texts).await?;
            for (i, v) in pending.into_iter().zip(vectors) {
                entries[i].embedding = v;
            }
        }
        Ok(Self { entries })
    }

    pub async fn load_yaml(path: impl AsRef<Path>, engine: &RetrievalEngine) -> AgentResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Storage(format!("reading {}: {}", path.display(), e)))?;
        let entries: Vec<KnowledgeEntry> = serde_yaml::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("knowledge file {}: {}", path.display(), e)))?;

        let knowledge = Self::embed_with(entries, engine).await?;
        info!("Loaded {} knowledge entries from {}", knowledge.len(), path.display());
        Ok(knowledge)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KnowledgeProvider for StaticKnowledge {
    async fn search(&self, query_embedding: &[f32], k: usize, filter: Option<&str>) -> AgentResult<Vec<Scored<KnowledgeEntry>>> {
        Ok(rank(query_embedding, &self.entries, k, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yaml_entries_deserialize_without_embeddings() {
        let yaml = r#"
- id: cobs
  source: regulation
  title: Suitability
  content: Advice must be suitable for the client's needs and circumstances.
- id: isa
  source: product
  title: ISA allowance
  content: The annual ISA subscription limit applies across all ISAs.
"#;
        let entries: Vec<KnowledgeEntry> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].embedding.is_empty());

        let mut entries = entries;
        entries[0].embedding = vec![1.0, 0.0];
        entries[1].embedding = vec![0.0, 1.0];
        let kb = StaticKnowledge::from_entries(entries);

        let hits = kb.search(&[0.0, 1.0], 5, Some("product")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, "isa");
    }
}
