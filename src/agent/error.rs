//! Agency error taxonomy.
//!
//! Every fallible library operation returns [`AgentResult`]. Binaries and
//! integration tests lift these into `anyhow` at the edges.

use thiserror::Error;

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// An external generation, embedding, judging or classification call
    /// failed after all retries.
    #[error("provider call '{call}' failed after {attempts} attempt(s){}: {message}", turn_suffix(.turn))]
    Provider {
        call: String,
        turn: Option<usize>,
        attempts: u32,
        message: String,
    },

    /// A generation call returned text that does not parse into the expected shape.
    #[error("malformed output from '{call}': {output}")]
    MalformedOutput { call: String, output: String },

    /// Store or embedding provider unreachable.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// An optimistic rule update kept losing its race.
    #[error("rule {rule_id} update lost the race {attempts} time(s)")]
    ConcurrencyConflict { rule_id: String, attempts: u32 },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} id '{id}' already exists")]
    DuplicateId { kind: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("consultation cancelled: {0}")]
    Cancelled(String),
}

fn turn_suffix(turn: &Option<usize>) -> String {
    match turn {
        Some(t) => format!(" on turn {}", t),
        None => String::new(),
    }
}

impl AgentError {
    pub fn malformed(call: impl Into<String>, output: impl Into<String>) -> Self {
        AgentError::MalformedOutput {
            call: call.into(),
            output: crate::utils::truncate::preview(&output.into(), 200),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        AgentError::Storage(err.to_string())
    }

    /// Attach the turn index to a provider failure.
    pub fn on_turn(self, index: usize) -> Self {
        match self {
            AgentError::Provider { call, attempts, message, .. } => AgentError::Provider {
                call,
                turn: Some(index),
                attempts,
                message,
            },
            other => other,
        }
    }

    /// Infrastructure failures end a consultation as `failed` rather than `unsuccessful`.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AgentError::Provider { .. }
                | AgentError::RetrievalUnavailable(_)
                | AgentError::Storage(_)
                | AgentError::Cancelled(_)
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(err: rusqlite::Error) -> Self {
        AgentError::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        AgentError::Storage(format!("blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mentions_turn() {
        let err = AgentError::Provider {
            call: "advisor".into(),
            turn: None,
            attempts: 3,
            message: "timeout".into(),
        }
        .on_turn(4);
        let text = err.to_string();
        assert!(text.contains("on turn 4"));
        assert!(text.contains("3 attempt(s)"));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_malformed_is_not_infrastructure() {
        let err = AgentError::malformed("reflect_on_failure", "???");
        assert!(!err.is_infrastructure());
    }
}
