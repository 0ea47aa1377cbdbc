//! Internal Event Bus
//!
//! Broadcast pub/sub for consultation and learning progress. Constructed
//! once by the caller and shared as `Arc<EventBus>`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::state::TerminationReason;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum AgencyEvent {
    ConsultationStarted { consultation: Uuid, customer: String, advisor: String },
    TurnCompleted { consultation: Uuid, index: usize, speaker: String },
    ConsultationFinished { consultation: Uuid, termination: TerminationReason, successful: bool, turns_used: usize },
    CaseRecorded { case: Uuid, consultation: Uuid },
    RuleCreated { rule: Uuid, category: String },
    RuleUpdated { rule: Uuid, confidence: f64, version: u64 },
    RuleDeprecated { rule: Uuid, confidence: f64 },
    CandidateRejected { category: String, reason: String },
    StatusUpdate(String),
}

pub struct EventBus {
    tx: broadcast::Sender<AgencyEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AgencyEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgencyEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_published_events() {
        let bus = EventBus::new();
        bus.publish(AgencyEvent::StatusUpdate("nobody listening".into()));

        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(AgencyEvent::CaseRecorded { case: id, consultation: id });
        assert_eq!(rx.recv().await.unwrap(), AgencyEvent::CaseRecorded { case: id, consultation: id });
    }
}
