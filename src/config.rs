//! Agency configuration
//!
//! Loaded once at startup from a JSON file, then overridden by `AGENCY_*`
//! environment variables. Every section has defaults so a missing file is
//! written out and used as-is.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use crate::agent::{AgentError, AgentResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgencyConfig {
    pub provider: ProviderConfig,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub learning: LearningConfig,
    pub consultation: ConsultationConfig,
    pub evaluation: EvaluationConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderBackend {
    Ollama,
    OpenaiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub backend: ProviderBackend,
    /// Base URL for the OpenAI-compatible backend
    pub base_url: String,
    /// Name of the env var holding the API key (never the key itself)
    pub api_key_env: String,
    pub advisor_model: String,
    pub customer_model: String,
    /// Model for reflection, classification and judging calls
    pub analyst_model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::Ollama,
            base_url: "http://localhost:8000/v1".to_string(),
            api_key_env: "AGENCY_API_KEY".to_string(),
            advisor_model: "qwen3:8b".to_string(),
            customer_model: "llama3.2:3b".to_string(),
            analyst_model: "deepseek-r1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub dimension: usize,
    /// Max texts per embedding provider call
    pub batch_size: usize,
    pub case_k: usize,
    pub rule_k: usize,
    pub memory_k: usize,
    pub knowledge_k: usize,
    /// Query embeddings kept for reuse
    pub query_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            batch_size: 32,
            case_k: 3,
            rule_k: 5,
            memory_k: 6,
            knowledge_k: 3,
            query_cache_size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub importance_weight: f32,
    pub recency_weight: f32,
    pub relevance_weight: f32,
    /// Multiplicative recency decay per elapsed virtual hour
    pub recency_decay_per_hour: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            importance_weight: 1.0,
            recency_weight: 1.0,
            relevance_weight: 1.0,
            recency_decay_per_hour: 0.995,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningConfig {
    pub rule_prior: f64,
    pub confidence_step: f64,
    pub deprecation_floor: f64,
    /// Similarity at or above which a candidate clashes with an existing rule
    pub redundancy_threshold: f32,
    /// Minimum judged value for a candidate rule to be kept
    pub min_rule_value: f64,
    pub max_update_attempts: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            rule_prior: 0.5,
            confidence_step: 0.1,
            deprecation_floor: 0.2,
            redundancy_threshold: 0.9,
            min_rule_value: 0.6,
            max_update_attempts: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsultationConfig {
    pub max_turns: usize,
    /// Virtual minutes that pass on every turn
    pub turn_minutes: i64,
    /// RFC 3339 start of the virtual clock; `None` starts at the wall clock
    pub clock_start: Option<String>,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            turn_minutes: 3,
            clock_start: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub workers: usize,
    pub run_timeout_secs: u64,
    pub calibration_bins: usize,
    /// Feed finished evaluation runs into the learning pipeline
    pub learn_during_evaluation: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            run_timeout_secs: 900,
            calibration_bins: 10,
            learn_during_evaluation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Snapshot file (memory backend) or database file (sqlite backend)
    pub path: PathBuf,
    /// YAML file with static regulatory/domain knowledge
    pub knowledge_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("experience.bin"),
            knowledge_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is unset
    pub filter: String,
    /// Directory for daily-rolling log files
    pub log_dir: Option<PathBuf>,
    /// Export spans over OTLP
    pub otlp: bool,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "advisory_agency=info".to_string(),
            log_dir: None,
            otlp: false,
            service_name: "advisory-agency".to_string(),
        }
    }
}

impl AgencyConfig {
    /// Apply `AGENCY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> AgentResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> AgentResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENCY_BACKEND") {
            self.provider.backend = match v.as_str() {
                "ollama" => ProviderBackend::Ollama,
                "openai" | "openai_compatible" => ProviderBackend::OpenaiCompatible,
                other => return Err(AgentError::Config(format!("unknown backend '{}'", other))),
            };
        }
        if let Some(v) = lookup("AGENCY_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Some(v) = lookup("AGENCY_ADVISOR_MODEL") {
            self.provider.advisor_model = v;
        }
        if let Some(v) = lookup("AGENCY_CUSTOMER_MODEL") {
            self.provider.customer_model = v;
        }
        if let Some(v) = lookup("AGENCY_ANALYST_MODEL") {
            self.provider.analyst_model = v;
        }
        if let Some(v) = lookup("AGENCY_EMBEDDING_MODEL") {
            self.provider.embedding_model = v;
        }
        if let Some(v) = lookup("AGENCY_EMBEDDING_DIM") {
            self.retrieval.dimension = parse_env("AGENCY_EMBEDDING_DIM", &v)?;
        }
        if let Some(v) = lookup("AGENCY_MAX_TURNS") {
            self.consultation.max_turns = parse_env("AGENCY_MAX_TURNS", &v)?;
        }
        if let Some(v) = lookup("AGENCY_WORKERS") {
            self.evaluation.workers = parse_env("AGENCY_WORKERS", &v)?;
        }
        if let Some(v) = lookup("AGENCY_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("AGENCY_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AGENCY_OTLP") {
            self.logging.otlp = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn validate(&self) -> AgentResult<()> {
        let r = &self.retrieval;
        if r.dimension == 0 || r.batch_size == 0 {
            return Err(AgentError::Config("embedding dimension and batch size must be positive".into()));
        }

        let m = &self.memory;
        let weights = [m.importance_weight, m.recency_weight, m.relevance_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f32>() <= 0.0 {
            return Err(AgentError::Config("memory weights must be non-negative and not all zero".into()));
        }
        if !(0.0..=1.0).contains(&m.recency_decay_per_hour) {
            return Err(AgentError::Config("recency decay must lie in [0, 1]".into()));
        }

        let l = &self.learning;
        for (name, v) in [
            ("rule_prior", l.rule_prior),
            ("confidence_step", l.confidence_step),
            ("deprecation_floor", l.deprecation_floor),
            ("min_rule_value", l.min_rule_value),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(AgentError::Config(format!("learning.{} must lie in [0, 1]", name)));
            }
        }
        if l.deprecation_floor >= l.rule_prior {
            return Err(AgentError::Config("deprecation floor must sit below the rule prior".into()));
        }
        if l.max_update_attempts == 0 {
            return Err(AgentError::Config("learning.max_update_attempts must be positive".into()));
        }

        if self.evaluation.workers == 0 {
            return Err(AgentError::Config("evaluation.workers must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> AgentResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("{}='{}' is not a valid value", key, value)))
}

/// Reads and writes the config file.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> AgentResult<AgencyConfig> {
        let mut config = if fs::try_exists(&self.path).await.unwrap_or(false) {
            let content = fs::read_to_string(&self.path).await.map_err(AgentError::storage)?;
            debug!("Loaded configuration from {:?}", self.path);
            serde_json::from_str(&content).map_err(|e| AgentError::Config(e.to_string()))?
        } else {
            info!("No configuration at {:?}; writing defaults", self.path);
            let default = AgencyConfig::default();
            self.save(&default).await?;
            default
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config: &AgencyConfig) -> AgentResult<()> {
        let content = serde_json::to_string_pretty(config).map_err(|e| AgentError::Config(e.to_string()))?;
        fs::write(&self.path, content).await.map_err(AgentError::storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        AgencyConfig::default().validate().unwrap();
    }

    #[test]
    fn test_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("AGENCY_BACKEND", "openai"),
            ("AGENCY_EMBEDDING_DIM", "1536"),
            ("AGENCY_MAX_TURNS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = AgencyConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.provider.backend, ProviderBackend::OpenaiCompatible);
        assert_eq!(config.retrieval.dimension, 1536);
        assert_eq!(config.consultation.max_turns, 5);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = AgencyConfig::default();
        let err = config
            .apply_overrides(|k| (k == "AGENCY_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_floor_above_prior_rejected() {
        let mut config = AgencyConfig::default();
        config.learning.deprecation_floor = 0.6;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agency.json");
        let manager = ConfigManager::new(&path);

        let loaded = manager.load().await.unwrap();
        assert!(path.exists());
        assert_eq!(loaded.learning, LearningConfig::default());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agency.json");
        tokio::fs::write(&path, r#"{"learning": {"confidence_step": 0.25}}"#).await.unwrap();

        let loaded = ConfigManager::new(&path).load().await.unwrap();
        assert_eq!(loaded.learning.confidence_step, 0.25);
        assert_eq!(loaded.learning.rule_prior, 0.5);
    }
}
