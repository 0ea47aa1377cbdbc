//! Turn-taking state machine.
//!
//! `Start -> AdvisorTurn <-> CustomerTurn -> Terminal(reason)`. The advisor
//! always speaks first. When the advisor declares the matter resolved the
//! customer still gets one closing reply, unless the turn budget is spent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    CustomerEnded,
    AdvisorResolved,
    MaxTurnsReached,
    ProviderFailure(String),
    Cancelled,
}

impl TerminationReason {
    /// Ended by one of the parties rather than by a limit or a fault.
    pub fn is_natural(&self) -> bool {
        matches!(self, TerminationReason::CustomerEnded | TerminationReason::AdvisorResolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsultationState {
    Start,
    AdvisorTurn,
    CustomerTurn,
    Terminal(TerminationReason),
}

/// What the orchestrator observed so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnSignals {
    pub customer_ended: bool,
    pub advisor_resolved: bool,
    pub turns_used: usize,
    pub max_turns: usize,
}

impl ConsultationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsultationState::Terminal(_))
    }

    /// Pure transition. Priority: customer end, then advisor resolution,
    /// then the turn budget.
    pub fn next(&self, signals: &TurnSignals) -> ConsultationState {
        use ConsultationState::*;

        match self {
            Terminal(reason) => Terminal(reason.clone()),
            Start => {
                if signals.max_turns == 0 {
                    Terminal(TerminationReason::MaxTurnsReached)
                } else {
                    AdvisorTurn
                }
            }
            AdvisorTurn | CustomerTurn => {
                let budget_spent = signals.turns_used >= signals.max_turns;
                if signals.customer_ended {
                    Terminal(TerminationReason::CustomerEnded)
                } else if signals.advisor_resolved && (*self == CustomerTurn || budget_spent) {
                    Terminal(TerminationReason::AdvisorResolved)
                } else if budget_spent {
                    Terminal(TerminationReason::MaxTurnsReached)
                } else if *self == AdvisorTurn {
                    CustomerTurn
                } else {
                    AdvisorTurn
                }
            }
        }
    }

    pub fn fail(reason: TerminationReason) -> ConsultationState {
        ConsultationState::Terminal(reason)
    }
}
