//! Memory Stream
//!
//! Per-consultation working memory. Nodes are kept in insertion order;
//! retrieval scores them by importance, recency and relevance and bumps the
//! access count of whatever it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retrieval::{similarity, Scored};
use super::MemoryNode;
use crate::config::MemoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamWeights {
    pub importance: f32,
    pub recency: f32,
    pub relevance: f32,
    pub decay_per_hour: f32,
}

impl From<&MemoryConfig> for StreamWeights {
    fn from(c: &MemoryConfig) -> Self {
        Self {
            importance: c.importance_weight,
            recency: c.recency_weight,
            relevance: c.relevance_weight,
            decay_per_hour: c.recency_decay_per_hour,
        }
    }
}

impl Default for StreamWeights {
    fn default() -> Self {
        (&MemoryConfig::default()).into()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    nodes: Vec<MemoryNode>,
    weights: StreamWeights,
}

/// Rescale to [0, 1]; a flat series maps to all ones.
fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;
    if !spread.is_finite() || spread <= f32::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / spread).collect()
}

impl MemoryStream {
    pub fn new(weights: StreamWeights) -> Self {
        Self { nodes: Vec::new(), weights }
    }

    pub fn push(&mut self, node: MemoryNode) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[MemoryNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn recency(&self, node: &MemoryNode, now: DateTime<Utc>) -> f32 {
        let hours = (now - node.created_at).num_seconds().max(0) as f32 / 3600.0;
        self.weights.decay_per_hour.powf(hours)
    }

    /// Score every node against `query` at virtual time `now`, return the top
    /// `k` (highest first, earlier node on ties) and count the access.
    pub fn retrieve(&mut self, query: &[f32], now: DateTime<Utc>, k: usize) -> Vec<Scored<MemoryNode>> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }

        let importance: Vec<f32> = self.nodes.iter().map(|n| n.importance).collect();
        let recency: Vec<f32> = self.nodes.iter().map(|n| self.recency(n, now)).collect();
        let relevance: Vec<f32> = self.nodes.iter().map(|n| similarity(query, &n.embedding)).collect();

        let (imp, rec, rel) = (min_max(&importance), min_max(&recency), min_max(&relevance));
        let w = self.weights;

        let mut ranked: Vec<(usize, f32)> = (0..self.nodes.len())
            .map(|i| (i, w.importance * imp[i] + w.recency * rec[i] + w.relevance * rel[i]))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(i, score)| {
                let node = &mut self.nodes[i];
                node.access_count += 1;
                Scored { item: node.clone(), score }
            })
            .collect()
    }

    /// Chronological dump for prompts.
    pub fn format_for_prompt(&self) -> String {
        self.nodes
            .iter()
            .map(|n| format!("[{}] {:?}: {}", n.created_at.format("%Y-%m-%d %H:%M"), n.kind, n.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_retrieve_prefers_relevant_recent_important() {
        let mut stream = MemoryStream::new(StreamWeights::default());
        stream.push(MemoryNode::observation("old, off-topic", t0(), vec![0.0, 1.0]).with_importance(0.1));
        stream.push(MemoryNode::observation("recent, on-topic", t0() + Duration::hours(48), vec![1.0, 0.0]).with_importance(0.9));
        stream.push(MemoryNode::new(MemoryKind::Plan, "middling", t0() + Duration::hours(24), vec![0.7, 0.7]).with_importance(0.5));

        let now = t0() + Duration::hours(49);
        let top = stream.retrieve(&[1.0, 0.0], now, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].item.content, "recent, on-topic");
        assert!(top[0].score >= top[1].score);
    }

    #[test]
    fn test_retrieve_counts_access_and_keeps_order() {
        let mut stream = MemoryStream::new(StreamWeights::default());
        for i in 0..4 {
            stream.push(MemoryNode::observation(format!("n{}", i), t0() + Duration::minutes(i), vec![1.0, i as f32]));
        }
        stream.retrieve(&[1.0, 0.0], t0() + Duration::hours(1), 2);
        stream.retrieve(&[1.0, 0.0], t0() + Duration::hours(1), 2);

        let contents: Vec<_> = stream.nodes().iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["n0", "n1", "n2", "n3"]);
        let accessed: u32 = stream.nodes().iter().map(|n| n.access_count).sum();
        assert_eq!(accessed, 4);
    }

    #[test]
    fn test_min_max_flat_series() {
        assert_eq!(min_max(&[0.4, 0.4]), vec![1.0, 1.0]);
        assert_eq!(min_max(&[0.0, 0.5, 1.0]), vec![0.0, 0.5, 1.0]);
    }
}
