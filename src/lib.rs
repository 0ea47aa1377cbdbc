//! Advisory Agency
//!
//! An experience-driven advisory agent:
//! - Simulated advisor/customer consultations on a virtual clock
//! - Retrieval over a memory stream, a case base and a rule base
//! - Learning of cases from successes and guidance rules from failures
//! - Evaluation, ablation and judge validation

pub mod agent;
pub mod config;
pub mod evaluation;
pub mod learning;
pub mod memory;
pub mod orchestrator;
pub mod safety;
pub mod utils;

// Re-exports for convenience
pub use agent::{AgentError, AgentResult};
pub use config::{AgencyConfig, ConfigManager};
pub use evaluation::EvaluationHarness;
pub use learning::LearningPipeline;
pub use orchestrator::Orchestrator;
