//! Consultation transcripts and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::TerminationReason;
use crate::agent::Speaker;

/// One utterance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub index: usize,
    pub speaker: Speaker,
    /// Raw text as generated, reasoning included
    pub content: String,
    /// What the other party sees
    pub visible: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    /// Copy of the turn with the raw text replaced by what the customer saw.
    pub fn shown_to_customer(&self) -> Turn {
        Turn { content: self.visible.clone(), ..self.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Ended by customer or advisor
    Completed,
    /// Turn budget ran out
    Incomplete,
    /// Infrastructure failure; says nothing about advice quality
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeResult {
    pub successful: bool,
    pub status: OutcomeStatus,
    pub termination: TerminationReason,
    /// 0.0 - 1.0
    pub customer_satisfaction: f32,
    pub customer_accepted: bool,
    pub compliance_issues: Vec<String>,
    pub turns_used: usize,
}

impl OutcomeResult {
    pub fn failed(termination: TerminationReason, turns_used: usize) -> Self {
        Self {
            successful: false,
            status: OutcomeStatus::Failed,
            termination,
            customer_satisfaction: 0.0,
            customer_accepted: false,
            compliance_issues: Vec::new(),
            turns_used,
        }
    }

    /// Successful only if the parties ended it, the customer accepted and
    /// nothing was flagged.
    pub fn assess(
        termination: TerminationReason,
        turns_used: usize,
        customer_satisfaction: f32,
        customer_accepted: bool,
        compliance_issues: Vec<String>,
    ) -> Self {
        let status = if termination.is_natural() {
            OutcomeStatus::Completed
        } else {
            OutcomeStatus::Incomplete
        };
        let successful = termination.is_natural() && customer_accepted && compliance_issues.is_empty();
        Self {
            successful,
            status,
            termination,
            customer_satisfaction: customer_satisfaction.clamp(0.0, 1.0),
            customer_accepted,
            compliance_issues,
            turns_used,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationResult {
    pub id: Uuid,
    pub customer_id: String,
    pub advisor: String,
    pub brief: String,
    pub transcript: Vec<Turn>,
    pub outcome: OutcomeResult,
    /// Rules that were in the advisor's context at any turn
    pub applied_rule_ids: Vec<Uuid>,
    pub retrieved_case_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ConsultationResult {
    pub fn advisor_turns(&self) -> impl Iterator<Item = &Turn> {
        self.transcript.iter().filter(|t| t.speaker == Speaker::Advisor)
    }

    /// Visible transcript, one line per turn.
    pub fn render_transcript(&self) -> String {
        render_turns(&self.transcript)
    }
}

pub fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.visible))
        .collect::<Vec<_>>()
        .join("\n")
}
