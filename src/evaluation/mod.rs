//! Evaluation Module
//!
//! Measures advisors over a customer population, isolates the contribution
//! of each retrieval source, and checks automated judges against labels.

pub mod harness;
pub mod judges;
pub mod metrics;

pub use harness::{AblationReport, AblationVariant, EvaluationHarness, EvaluationRun};
pub use judges::{
    judge_agreement, parse_verdict, validate_llm_judges, CalibrationBucket, Judge, JudgeReliability, JudgeVerdict,
    LabelledTranscript, LlmJudge,
};
pub use metrics::{AdvisorMetrics, MetricDelta};
