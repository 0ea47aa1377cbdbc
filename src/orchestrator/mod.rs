//! Orchestrator Module
//!
//! Runs simulated consultations: virtual time, the turn state machine,
//! retrieval-enriched advisor turns and the final outcome.

pub mod clock;
pub mod consultation;
pub mod event_bus;
pub mod outcome;
pub mod state;

pub use clock::{humanize, VirtualClock};
pub use consultation::{Orchestrator, RetrievalSources};
pub use event_bus::{AgencyEvent, EventBus};
pub use outcome::{ConsultationResult, OutcomeResult, OutcomeStatus, Turn};
pub use state::{ConsultationState, TerminationReason, TurnSignals};
