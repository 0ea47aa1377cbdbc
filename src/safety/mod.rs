//! Safety Module
//!
//! Compliance guardrails over advisor output.

pub mod compliance;

pub use compliance::{strip_reasoning, ComplianceReport, ComplianceValidator, RuleBasedCompliance};
