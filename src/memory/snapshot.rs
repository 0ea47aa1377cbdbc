//! Experience snapshots
//!
//! The in-memory stores persist as one zstd-compressed bincode blob.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{Case, CaseStore, GuidanceRule, InMemoryCaseStore, InMemoryRuleStore, RuleStore};
use crate::agent::{AgentError, AgentResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperienceSnapshot {
    pub cases: Vec<Case>,
    pub rules: Vec<GuidanceRule>,
}

impl ExperienceSnapshot {
    pub async fn capture(cases: &dyn CaseStore, rules: &dyn RuleStore) -> AgentResult<Self> {
        Ok(Self {
            cases: cases.all().await?,
            rules: rules.all().await?,
        })
    }

    pub fn into_stores(self) -> (InMemoryCaseStore, InMemoryRuleStore) {
        (InMemoryCaseStore::from_cases(self.cases), InMemoryRuleStore::from_rules(self.rules))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> AgentResult<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let snapshot = self.clone();
        let (n_cases, n_rules) = (snapshot.cases.len(), snapshot.rules.len());

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let writer = BufWriter::new(File::create(&path)?);
            let mut encoder = zstd::stream::write::Encoder::new(writer, 3)?;
            bincode::serialize_into(&mut encoder, &snapshot).map_err(std::io::Error::other)?;
            encoder.finish()?;
            Ok::<(), std::io::Error>(())
        })
        .await?
        .map_err(AgentError::storage)?;

        info!("Saved experience snapshot: {} case(s), {} rule(s)", n_cases, n_rules);
        Ok(())
    }

    /// Missing file means no experience yet.
    pub async fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self::default());
        }

        tokio::task::spawn_blocking(move || {
            let decoder = zstd::stream::read::Decoder::new(BufReader::new(File::open(&path)?))?;
            bincode::deserialize_from(decoder).map_err(std::io::Error::other)
        })
        .await?
        .map_err(AgentError::storage)
    }
}
