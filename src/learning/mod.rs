//! Learning Module
//!
//! Turns consultation outcomes into cases and guidance rules, and keeps
//! rule confidence in line with how the rules perform.

pub mod confidence;
pub mod pipeline;
pub mod validation;

pub use confidence::{update_confidence, ConfidenceModel};
pub use pipeline::{CandidateOutcome, LearningPipeline, LearningReport};
pub use validation::{contradicts, validate_principle, word_overlap, PrincipleVerdict};
