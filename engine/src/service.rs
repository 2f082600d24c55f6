use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use celine_core::error::TriageError;
use celine_core::session::TranscriptEntry;
use celine_core::state::{TriageState, UrgencyTier};
use celine_core::ticket::HandoffTicket;
use celine_store::{Envelope, TriageStore};

use crate::config::EngineConfig;
use crate::orchestrator::Orchestrator;
use crate::rules::RulesHandle;

pub const CLARIFICATION_RESPONSE: &str = "I didn't receive a usable message. Please describe \
your symptoms or question in a short sentence.";

/// What one processed turn looks like to a caller.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    pub state: TriageState,
    pub urgency: UrgencyTier,
    /// True when this turn created or reaffirmed a human handoff.
    pub requires_handoff: bool,
    /// Ticket rationale, present only on the turn that opened the ticket.
    pub handoff_reason: Option<String>,
}

/// The embedding surface of the triage system. Owns the orchestrator and the
/// store; callers never touch either directly.
#[derive(Clone)]
pub struct TriageService {
    orchestrator: Arc<Orchestrator>,
}

impl TriageService {
    /// Boot the service from configuration: derive the envelope key, open
    /// the store, load the clinical rules document.
    pub async fn start(config: &EngineConfig) -> Result<Self, TriageError> {
        let envelope = Envelope::from_key_material(&config.encryption_key)?;
        let store = TriageStore::connect(&config.database_url, envelope).await?;
        let rules = RulesHandle::load(&config.rules_path)?;
        Ok(Self::with_parts(store, rules))
    }

    pub fn with_parts(store: TriageStore, rules: RulesHandle) -> Self {
        TriageService {
            orchestrator: Arc::new(Orchestrator::new(store, rules)),
        }
    }

    /// Process one user message. Invalid input degrades to a fixed
    /// clarification reply with no state change; every other error is the
    /// caller's to handle.
    pub async fn process_turn(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<TurnOutcome, TriageError> {
        match self.orchestrator.handle_turn(conversation_id, message).await {
            Ok(outcome) => Ok(outcome),
            Err(TriageError::Input(reason)) => {
                tracing::debug!(conversation = conversation_id, reason, "invalid input");
                Ok(TurnOutcome {
                    response: CLARIFICATION_RESPONSE.to_string(),
                    state: TriageState::Idle,
                    urgency: UrgencyTier::Pending,
                    requires_handoff: false,
                    handoff_reason: None,
                })
            }
            Err(err) => {
                tracing::error!(
                    conversation = conversation_id,
                    code = err.code(),
                    error = %err,
                    "turn failed"
                );
                Err(err)
            }
        }
    }

    /// Ordered, decrypted transcript for a conversation.
    pub async fn get_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TranscriptEntry>, TriageError> {
        self.orchestrator.store().history(conversation_id).await
    }

    /// The admin handoff queue, newest first.
    pub async fn list_open_tickets(&self) -> Result<Vec<HandoffTicket>, TriageError> {
        self.orchestrator.store().list_open_tickets().await
    }

    /// Resolve a handoff ticket, closing its conversation. Idempotent.
    pub async fn resolve_ticket(
        &self,
        ticket_id: Uuid,
        note: Option<String>,
    ) -> Result<HandoffTicket, TriageError> {
        self.orchestrator.resolve_ticket(ticket_id, note).await
    }

    /// Verified audit trail for a conversation, in sequence order.
    pub async fn audit_trail(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<celine_core::audit::AuditEvent>, TriageError> {
        self.orchestrator.store().audit_trail(conversation_id).await
    }

    /// Swap in a new clinical rules document from the configured path.
    pub fn reload_rules(&self) -> Result<usize, TriageError> {
        self.orchestrator.rules().reload()
    }
}

#[cfg(test)]
mod tests {
    use celine_store::Envelope;

    use crate::rules::RuleSet;

    use super::*;

    async fn service() -> TriageService {
        let envelope = Envelope::from_key_material("service-test-key").unwrap();
        let store = TriageStore::in_memory(envelope).await.unwrap();
        let rules = RulesHandle::new(
            RuleSet::from_json_str(r#"{"rules": [{"id": "r", "urgency": "routine", "phrases_any": ["cough"]}]}"#)
                .unwrap(),
        );
        TriageService::with_parts(store, rules)
    }

    #[tokio::test]
    async fn invalid_input_becomes_a_clarification_not_an_error() {
        let service = service().await;
        let outcome = service.process_turn("c-1", "").await.unwrap();
        assert_eq!(outcome.response, CLARIFICATION_RESPONSE);
        assert!(service.get_history("c-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_returns_both_sides_of_the_conversation() {
        let service = service().await;
        service.process_turn("c-1", "hello").await.unwrap();
        let history = service.get_history("c-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
    }
}
