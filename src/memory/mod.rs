//! Memory System Module
//!
//! Embedding-backed retrieval over three kinds of experience: the
//! per-consultation memory stream, the case base and the rule base, plus the
//! static knowledge collaborator.

pub mod cases;
pub mod embedding;
pub mod entry;
pub mod knowledge;
pub mod retrieval;
pub mod rules;
pub mod snapshot;
pub mod sqlite;
pub mod stream;

pub use cases::{Case, CaseStore, InMemoryCaseStore};
pub use embedding::{embedder_from_config, EmbeddingProvider, OllamaEmbedder, OpenAICompatibleEmbedder};
pub use entry::{MemoryKind, MemoryNode};
pub use knowledge::{KnowledgeEntry, KnowledgeProvider, StaticKnowledge};
pub use retrieval::{rank, similarity, Retrievable, RetrievalEngine, Scored};
pub use rules::{GuidanceRule, InMemoryRuleStore, RuleState, RuleStore};
pub use snapshot::ExperienceSnapshot;
pub use sqlite::SqliteKnowledgeStore;
pub use stream::{MemoryStream, StreamWeights};
