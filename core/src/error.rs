use thiserror::Error;
use uuid::Uuid;

/// Fault taxonomy for the triage core. The failsafe policy is: when
/// uncertain, prefer escalation over routine closure, and prefer emergency
/// over escalation. No variant here may ever be converted into fabricated
/// clinical content.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Malformed conversation id or message. Recovered locally with a
    /// generic clarification; no state change.
    #[error("invalid input: {0}")]
    Input(String),

    /// Internal fault inside the red-flag engine. Treated as a red flag by
    /// the orchestrator (fail toward safety, not away from it).
    #[error("red-flag detection fault: {0}")]
    Detection(String),

    /// Malformed rule configuration or an unresolvable predicate. The
    /// orchestrator falls back to conservative escalation, never routine
    /// closure.
    #[error("clinical rule evaluation failed: {0}")]
    RuleEvaluation(String),

    /// Encryption, decryption, or persistence failure. Fatal for the turn:
    /// no response is fabricated from stale or default clinical assumptions.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Per-conversation lock could not be acquired within the bounded retry
    /// budget. Transient; the caller may retry the turn.
    #[error("conversation '{0}' has a turn in flight")]
    Busy(String),

    /// Admin surface: the referenced ticket does not exist.
    #[error("ticket {0} not found")]
    TicketNotFound(Uuid),
}

impl TriageError {
    /// Machine-readable code for the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            TriageError::Input(_) => codes::INVALID_INPUT,
            TriageError::Detection(_) => codes::DETECTION_FAULT,
            TriageError::RuleEvaluation(_) => codes::RULE_EVALUATION_FAILED,
            TriageError::Storage(_) => codes::STORAGE_FAILURE,
            TriageError::Busy(_) => codes::CONVERSATION_BUSY,
            TriageError::TicketNotFound(_) => codes::TICKET_NOT_FOUND,
        }
    }

    /// Whether the API boundary should surface this as a transient,
    /// retryable condition rather than a client error.
    pub fn is_transient(&self) -> bool {
        matches!(self, TriageError::Busy(_) | TriageError::Storage(_))
    }
}

/// Error codes used across the service boundary
pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const DETECTION_FAULT: &str = "detection_fault";
    pub const RULE_EVALUATION_FAILED: &str = "rule_evaluation_failed";
    pub const STORAGE_FAILURE: &str = "storage_failure";
    pub const CONVERSATION_BUSY: &str = "conversation_busy";
    pub const TICKET_NOT_FOUND: &str = "ticket_not_found";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_busy_and_storage() {
        assert!(TriageError::Busy("c-1".into()).is_transient());
        assert!(TriageError::Storage("decrypt".into()).is_transient());
        assert!(!TriageError::Input("empty".into()).is_transient());
        assert!(!TriageError::TicketNotFound(Uuid::now_v7()).is_transient());
    }
}
