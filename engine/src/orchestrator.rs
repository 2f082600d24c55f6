use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use celine_core::audit::{AuditKind, AuditRecord};
use celine_core::error::TriageError;
use celine_core::session::{Role, Session, TranscriptEntry};
use celine_core::state::{RoutingDecision, TriageState, UrgencyTier};
use celine_core::ticket::{HandoffTicket, TicketStatus};
use celine_store::{TicketWrite, TranscriptWrite, TriageStore};

use crate::escalation::{EMERGENCY_RESPONSE, EscalationAgent};
use crate::front_desk::{FrontDeskAgent, IDENTITY_REPLY};
use crate::intake::IntakeAgent;
use crate::intent::{Intent, IntentClassifier, MIN_INTENT_CONFIDENCE, is_identity_question};
use crate::red_flags::RedFlagEngine;
use crate::risk::RiskScoringAgent;
use crate::rules::{RuleVerdict, RulesHandle};
use crate::service::TurnOutcome;

const MAX_UTTERANCE_CHARS: usize = 4000;
const MAX_CONVERSATION_ID_CHARS: usize = 128;

const LOCK_RETRIES: u32 = 5;
const LOCK_RETRY_BASE: Duration = Duration::from_millis(25);

pub const PINNED_RESPONSE: &str = "A clinician is reviewing your case right now. Please stay \
reachable; if your symptoms worsen, call your local emergency number immediately.";

pub const CLOSED_RESPONSE: &str = "This triage session is complete. Start a new conversation if \
you have a new concern, or call your local emergency number for anything urgent.";

/// Per-conversation turn locks. A conversation admits one turn at a time;
/// a second caller gets a bounded retry window, then a transient busy error
/// instead of an unbounded wait.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn handle(&self, conversation_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, TriageError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| TriageError::Storage("session lock registry poisoned".to_string()))?;
        // A strong count of 1 means only the registry holds the lock: no
        // turn in flight, no waiter. Evicting here keeps the registry
        // bounded by the set of currently active conversations.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(
            map.entry(conversation_id.to_string()).or_default(),
        ))
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    async fn acquire(
        &self,
        conversation_id: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, TriageError> {
        let handle = self.handle(conversation_id)?;
        for attempt in 1..=LOCK_RETRIES {
            match Arc::clone(&handle).try_lock_owned() {
                Ok(guard) => return Ok(guard),
                Err(_) => tokio::time::sleep(LOCK_RETRY_BASE * attempt).await,
            }
        }
        Err(TriageError::Busy(conversation_id.to_string()))
    }
}

/// The only component that mutates sessions. Runs the fixed turn pipeline:
/// red-flag scan, state-bound agent dispatch, rules evaluation, transition
/// table lookup, atomic commit. Agents propose; only the transition table
/// disposes.
pub struct Orchestrator {
    store: TriageStore,
    rules: Arc<RulesHandle>,
    red_flags: RedFlagEngine,
    classifier: IntentClassifier,
    front_desk: FrontDeskAgent,
    intake: IntakeAgent,
    risk: RiskScoringAgent,
    escalation: EscalationAgent,
    locks: SessionLocks,
}

impl Orchestrator {
    pub fn new(store: TriageStore, rules: RulesHandle) -> Self {
        Orchestrator {
            store,
            rules: Arc::new(rules),
            red_flags: RedFlagEngine::default(),
            classifier: IntentClassifier,
            front_desk: FrontDeskAgent,
            intake: IntakeAgent,
            risk: RiskScoringAgent,
            escalation: EscalationAgent,
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &TriageStore {
        &self.store
    }

    pub fn rules(&self) -> &RulesHandle {
        &self.rules
    }

    /// Process one user turn. Everything the turn decided commits in one
    /// transaction at the end; any error before the commit leaves the
    /// conversation exactly as it was.
    pub async fn handle_turn(
        &self,
        conversation_id: &str,
        utterance: &str,
    ) -> Result<TurnOutcome, TriageError> {
        validate_input(conversation_id, utterance)?;
        let _guard = self.locks.acquire(conversation_id).await?;
        let now = Utc::now();

        let mut records: Vec<AuditRecord> = Vec::new();
        let mut session = match self.store.load_session(conversation_id).await? {
            Some(session) => session,
            None => {
                let mut session = Session::new(conversation_id, now);
                records.push(AuditRecord::new(
                    AuditKind::StateTransition,
                    TriageState::Idle,
                    TriageState::Greeting,
                    json!({"reason": "session_created"}),
                    now,
                ));
                session.state = TriageState::Greeting;
                session
            }
        };

        let mut messages: Vec<TranscriptWrite> = vec![
            TranscriptEntry {
                role: Role::User,
                content: utterance.to_string(),
                timestamp: now,
            }
            .into(),
        ];

        // Red flags run before any other interpretation, every turn, in
        // every state. A hit supersedes whatever the agents would have done.
        let flags = self.red_flags.detect(utterance, &session);
        if !flags.is_empty() {
            let previous = session.state;
            let prior_urgency = session.urgency;
            for flag in &flags {
                session.record_red_flag(flag);
            }
            session.state = TriageState::Emergency;
            session.urgency = UrgencyTier::Emergency;
            records.push(AuditRecord::new(
                AuditKind::RedFlagTriggered,
                previous,
                TriageState::Emergency,
                json!({"red_flags": &flags}),
                now,
            ));
            tracing::warn!(
                conversation = conversation_id,
                red_flags = ?flags,
                "red flags detected; forcing emergency"
            );
            return self
                .commit_emergency(session, records, messages, prior_urgency, now)
                .await;
        }

        // A pinned conversation waits for a human. Only ticket resolution
        // moves it; new red flags above are the single exception.
        if session.state.is_pinned() {
            let state = session.state;
            session.updated_at = now;
            records.push(AuditRecord::new(
                AuditKind::StateTransition,
                state,
                state,
                json!({"reason": "awaiting_human_review"}),
                now,
            ));
            messages.push(assistant_message(PINNED_RESPONSE, now));
            self.store
                .commit_turn(&session, &records, &messages, None)
                .await?;
            return Ok(TurnOutcome {
                response: PINNED_RESPONSE.to_string(),
                state,
                urgency: session.urgency,
                requires_handoff: false,
                handoff_reason: None,
            });
        }

        let (routing, mut response) = self.dispatch(&mut session, utterance);

        // Rules and risk recompute from the full field set every turn, so
        // the stored session always reflects current evidence. A rules
        // fault degrades to urgent review, never to routine closure.
        let intake_complete = routing == RoutingDecision::IntakeComplete;
        let verdict = match self.rules.evaluate(&session, intake_complete) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::error!(
                    conversation = conversation_id,
                    error = %err,
                    "rule evaluation failed; degrading to urgent review"
                );
                records.push(AuditRecord::new(
                    AuditKind::ErrorFailsafe,
                    session.state,
                    session.state,
                    json!({"error": err.code(), "fallback_urgency": "urgent"}),
                    now,
                ));
                RuleVerdict {
                    tier: UrgencyTier::Urgent,
                    triggered_rules: Vec::new(),
                }
            }
        };
        session.urgency = verdict.tier;
        session.triggered_rules = verdict.triggered_rules;
        session.risk_score = self.risk.score(&session);
        session.updated_at = now;

        let previous = session.state;
        let Some(next) = next_state(previous, &routing, session.urgency) else {
            // Unmapped (state, routing, tier) combination. Fail closed.
            tracing::error!(
                conversation = conversation_id,
                state = %previous,
                routing = routing.as_str(),
                "unmapped transition; failing closed to emergency"
            );
            records.push(AuditRecord::new(
                AuditKind::ErrorFailsafe,
                previous,
                TriageState::Emergency,
                json!({"reason": "unmapped_transition", "routing": routing.as_str()}),
                now,
            ));
            let prior_urgency = session.urgency;
            session.state = TriageState::Emergency;
            session.urgency = UrgencyTier::Emergency;
            return self
                .commit_emergency(session, records, messages, prior_urgency, now)
                .await;
        };

        session.state = next;
        records.push(AuditRecord::new(
            AuditKind::StateTransition,
            previous,
            next,
            json!({
                "routing": routing.as_str(),
                "urgency": session.urgency,
                "risk_score": session.risk_score,
            }),
            now,
        ));

        let mut new_ticket = None;
        let mut handoff_reason = None;
        let requires_handoff = next.is_pinned();
        if requires_handoff {
            let tier = if next == TriageState::Emergency {
                UrgencyTier::Emergency
            } else {
                session.urgency.max(UrgencyTier::Urgent)
            };
            session.urgency = tier;
            response = self.escalation.disposition(tier).to_string();
            if session.open_ticket.is_none() {
                let summary = self.escalation.ticket_summary(
                    tier,
                    &session.red_flags,
                    &session.triggered_rules,
                );
                let ticket =
                    HandoffTicket::open(&session.conversation_id, tier, summary.clone(), now);
                session.open_ticket = Some(ticket.id);
                records.push(AuditRecord::new(
                    AuditKind::Escalation,
                    next,
                    next,
                    json!({"ticket": ticket.id.to_string(), "urgency": tier, "summary": summary}),
                    now,
                ));
                handoff_reason = Some(summary);
                new_ticket = Some(TicketWrite::Create(ticket));
            }
        } else if intake_complete {
            response = self.escalation.disposition(session.urgency).to_string();
        }

        messages.push(assistant_message(&response, now));
        self.store
            .commit_turn(&session, &records, &messages, new_ticket.as_ref())
            .await?;

        tracing::info!(
            conversation = conversation_id,
            state = %session.state,
            urgency = %session.urgency,
            routing = routing.as_str(),
            "turn committed"
        );

        Ok(TurnOutcome {
            response,
            state: session.state,
            urgency: session.urgency,
            requires_handoff,
            handoff_reason,
        })
    }

    /// Mark a handoff ticket resolved and close its conversation. Idempotent:
    /// resolving an already-resolved ticket returns it unchanged.
    pub async fn resolve_ticket(
        &self,
        ticket_id: Uuid,
        note: Option<String>,
    ) -> Result<HandoffTicket, TriageError> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(TriageError::TicketNotFound(ticket_id))?;

        let _guard = self.locks.acquire(&ticket.conversation_id).await?;
        // Re-read under the lock; a concurrent resolve may have won.
        let mut ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(TriageError::TicketNotFound(ticket_id))?;
        if ticket.status == TicketStatus::Resolved {
            return Ok(ticket);
        }

        let now = Utc::now();
        let mut session = self
            .store
            .load_session(&ticket.conversation_id)
            .await?
            .ok_or_else(|| {
                TriageError::Storage(format!(
                    "session '{}' missing for ticket {ticket_id}",
                    ticket.conversation_id
                ))
            })?;

        ticket.status = TicketStatus::Resolved;
        ticket.resolved_at = Some(now);
        ticket.resolution_note = note.clone();

        let previous = session.state;
        session.state = TriageState::Closed;
        session.open_ticket = None;
        session.updated_at = now;

        // Closure is only reachable from ESCALATED on the allowed graph, so
        // resolving an emergency steps down through ESCALATED first and the
        // replayed trail stays inside it.
        let details = json!({"reason": "ticket_resolved", "ticket": ticket_id.to_string()});
        let mut records = Vec::new();
        if previous == TriageState::Emergency {
            records.push(AuditRecord::new(
                AuditKind::StateTransition,
                TriageState::Emergency,
                TriageState::Escalated,
                details.clone(),
                now,
            ));
            records.push(AuditRecord::new(
                AuditKind::StateTransition,
                TriageState::Escalated,
                TriageState::Closed,
                details,
                now,
            ));
        } else {
            records.push(AuditRecord::new(
                AuditKind::StateTransition,
                previous,
                TriageState::Closed,
                details,
                now,
            ));
        }
        let mut messages: Vec<TranscriptWrite> = Vec::new();
        if let Some(note) = note {
            messages.push(
                TranscriptEntry {
                    role: Role::Human,
                    content: note,
                    timestamp: now,
                }
                .into(),
            );
        }

        self.store
            .commit_resolution(&ticket, &session, &records, &messages)
            .await?;

        tracing::info!(
            conversation = %ticket.conversation_id,
            ticket = %ticket_id,
            "handoff ticket resolved; conversation closed"
        );
        Ok(ticket)
    }

    /// The state-bound agent for the current state proposes a routing
    /// decision and (for non-disposition turns) the reply text.
    fn dispatch(&self, session: &mut Session, utterance: &str) -> (RoutingDecision, String) {
        match session.state {
            TriageState::Idle | TriageState::Greeting => {
                if is_identity_question(utterance) {
                    return (RoutingDecision::FrontDesk, IDENTITY_REPLY.to_string());
                }
                let result = self.classifier.classify(utterance);
                if result.confidence < MIN_INTENT_CONFIDENCE {
                    return (RoutingDecision::HumanReview, String::new());
                }
                if result.intent == Intent::MedicalSymptom {
                    self.intake.begin(session, utterance);
                    let prompt = self
                        .intake
                        .next_question(session)
                        .map(|q| q.prompt.to_string())
                        .unwrap_or_default();
                    return (RoutingDecision::BeginIntake, prompt);
                }
                (RoutingDecision::FrontDesk, self.front_desk.respond(result.intent))
            }
            TriageState::Intake | TriageState::Triage => {
                self.intake.record_answer(session, utterance);
                match self.intake.next_question(session) {
                    Some(question) => {
                        (RoutingDecision::ContinueIntake, question.prompt.to_string())
                    }
                    None => (RoutingDecision::IntakeComplete, String::new()),
                }
            }
            TriageState::Closed => (RoutingDecision::FrontDesk, CLOSED_RESPONSE.to_string()),
            // Pinned states never reach dispatch.
            TriageState::Emergency | TriageState::Escalated => {
                (RoutingDecision::FrontDesk, PINNED_RESPONSE.to_string())
            }
        }
    }

    /// Shared tail for every path that ends the turn in `Emergency`: score,
    /// ticket creation or urgency upgrade, fixed emergency reply, atomic
    /// commit.
    async fn commit_emergency(
        &self,
        mut session: Session,
        mut records: Vec<AuditRecord>,
        mut messages: Vec<TranscriptWrite>,
        prior_urgency: UrgencyTier,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TriageError> {
        session.risk_score = self.risk.score(&session);
        session.updated_at = now;

        let mut ticket_write = None;
        let mut handoff_reason = None;
        match session.open_ticket {
            None => {
                let summary = self.escalation.ticket_summary(
                    UrgencyTier::Emergency,
                    &session.red_flags,
                    &session.triggered_rules,
                );
                let ticket = HandoffTicket::open(
                    &session.conversation_id,
                    UrgencyTier::Emergency,
                    summary.clone(),
                    now,
                );
                session.open_ticket = Some(ticket.id);
                records.push(AuditRecord::new(
                    AuditKind::Escalation,
                    TriageState::Emergency,
                    TriageState::Emergency,
                    json!({"ticket": ticket.id.to_string(), "urgency": "emergency", "summary": summary}),
                    now,
                ));
                handoff_reason = Some(summary);
                ticket_write = Some(TicketWrite::Create(ticket));
            }
            // The open ticket must track the new severity: an operator
            // sorting the queue by urgency has to see this case on top.
            Some(id) if prior_urgency < UrgencyTier::Emergency => {
                records.push(AuditRecord::new(
                    AuditKind::Escalation,
                    TriageState::Emergency,
                    TriageState::Emergency,
                    json!({"ticket": id.to_string(), "urgency": "emergency", "reason": "urgency_raised"}),
                    now,
                ));
                ticket_write = Some(TicketWrite::Escalate {
                    id,
                    urgency: UrgencyTier::Emergency,
                });
            }
            Some(_) => {}
        }

        messages.push(assistant_message(EMERGENCY_RESPONSE, now));
        self.store
            .commit_turn(&session, &records, &messages, ticket_write.as_ref())
            .await?;

        Ok(TurnOutcome {
            response: EMERGENCY_RESPONSE.to_string(),
            state: TriageState::Emergency,
            urgency: UrgencyTier::Emergency,
            requires_handoff: true,
            handoff_reason,
        })
    }
}

fn assistant_message(content: &str, now: DateTime<Utc>) -> TranscriptWrite {
    TranscriptEntry {
        role: Role::Assistant,
        content: content.to_string(),
        timestamp: now,
    }
    .into()
}

fn validate_input(conversation_id: &str, utterance: &str) -> Result<(), TriageError> {
    if conversation_id.trim().is_empty() {
        return Err(TriageError::Input(
            "conversation id must be non-empty".to_string(),
        ));
    }
    if conversation_id.chars().count() > MAX_CONVERSATION_ID_CHARS {
        return Err(TriageError::Input(format!(
            "conversation id exceeds {MAX_CONVERSATION_ID_CHARS} characters"
        )));
    }
    if utterance.trim().is_empty() {
        return Err(TriageError::Input("message must be non-empty".to_string()));
    }
    if utterance.chars().count() > MAX_UTTERANCE_CHARS {
        return Err(TriageError::Input(format!(
            "message exceeds {MAX_UTTERANCE_CHARS} characters"
        )));
    }
    Ok(())
}

/// The complete transition table. `None` is an unmapped combination, which
/// the caller turns into a fail-closed emergency.
fn next_state(
    current: TriageState,
    routing: &RoutingDecision,
    tier: UrgencyTier,
) -> Option<TriageState> {
    use RoutingDecision as R;
    use TriageState as S;
    match (current, routing) {
        (S::Idle | S::Greeting, R::FrontDesk) => Some(S::Greeting),
        (S::Idle | S::Greeting, R::BeginIntake) => Some(S::Intake),
        (S::Idle | S::Greeting, R::HumanReview) => Some(S::Escalated),
        (S::Intake | S::Triage, R::ContinueIntake) => Some(S::Triage),
        (S::Intake | S::Triage, R::IntakeComplete) => match tier {
            UrgencyTier::Emergency => Some(S::Emergency),
            UrgencyTier::Urgent => Some(S::Escalated),
            UrgencyTier::Routine => Some(S::Closed),
            UrgencyTier::Pending => None,
        },
        (S::Closed, R::FrontDesk) => Some(S::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use celine_store::Envelope;

    use crate::red_flags::DETECTOR_FAULT_FLAG;
    use crate::rules::RuleSet;

    use super::*;

    const TEST_RULES: &str = r#"{
        "rules": [
            {
                "id": "severe_pain",
                "urgency": "urgent",
                "severity_min": 8,
                "phrases_any": ["pain"]
            },
            {
                "id": "short_cough",
                "urgency": "routine",
                "phrases_any": ["cough"],
                "max_duration_days": 7
            }
        ]
    }"#;

    async fn orchestrator() -> Orchestrator {
        let envelope = Envelope::from_key_material("orchestrator-test-key").unwrap();
        let store = TriageStore::in_memory(envelope).await.unwrap();
        let rules = RulesHandle::new(RuleSet::from_json_str(TEST_RULES).unwrap());
        Orchestrator::new(store, rules)
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_any_write() {
        let orch = orchestrator().await;
        let err = orch.handle_turn("c-1", "   ").await.unwrap_err();
        assert!(matches!(err, TriageError::Input(_)));
        assert!(orch.store().load_session("c-1").await.unwrap().is_none());
        assert!(orch.store().audit_trail("c-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn greeting_turn_stays_in_greeting() {
        let orch = orchestrator().await;
        let outcome = orch.handle_turn("c-1", "hello there").await.unwrap();
        assert_eq!(outcome.state, TriageState::Greeting);
        assert!(!outcome.requires_handoff);

        let trail = orch.store().audit_trail("c-1").await.unwrap();
        assert_eq!(trail[0].previous_state, TriageState::Idle);
        assert_eq!(trail[0].new_state, TriageState::Greeting);
    }

    #[tokio::test]
    async fn red_flag_forces_emergency_and_opens_one_ticket() {
        let orch = orchestrator().await;
        let outcome = orch
            .handle_turn("c-1", "sudden chest pain and I can't breathe")
            .await
            .unwrap();
        assert_eq!(outcome.state, TriageState::Emergency);
        assert_eq!(outcome.urgency, UrgencyTier::Emergency);
        assert!(outcome.requires_handoff);

        let session = orch.store().load_session("c-1").await.unwrap().unwrap();
        assert!(session.open_ticket.is_some());
        assert_eq!(orch.store().list_open_tickets().await.unwrap().len(), 1);

        // A second flagged turn reuses the open ticket.
        orch.handle_turn("c-1", "still chest pain").await.unwrap();
        assert_eq!(orch.store().list_open_tickets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pinned_conversation_only_moves_on_resolution() {
        let orch = orchestrator().await;
        orch.handle_turn("c-1", "I think I'm dying").await.unwrap();

        let outcome = orch.handle_turn("c-1", "what should I do now").await.unwrap();
        assert_eq!(outcome.state, TriageState::Emergency);
        assert_eq!(outcome.response, PINNED_RESPONSE);

        let session = orch.store().load_session("c-1").await.unwrap().unwrap();
        let ticket_id = session.open_ticket.unwrap();
        let resolved = orch
            .resolve_ticket(ticket_id, Some("spoke to patient, EMS dispatched".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, TicketStatus::Resolved);

        let session = orch.store().load_session("c-1").await.unwrap().unwrap();
        assert_eq!(session.state, TriageState::Closed);
        assert!(session.open_ticket.is_none());
    }

    #[tokio::test]
    async fn resolving_twice_is_idempotent() {
        let orch = orchestrator().await;
        orch.handle_turn("c-1", "severe bleeding from my arm")
            .await
            .unwrap();
        let ticket_id = orch
            .store()
            .load_session("c-1")
            .await
            .unwrap()
            .unwrap()
            .open_ticket
            .unwrap();

        let first = orch.resolve_ticket(ticket_id, Some("handled".into())).await.unwrap();
        let second = orch.resolve_ticket(ticket_id, Some("handled again".into())).await.unwrap();
        assert_eq!(first.resolved_at, second.resolved_at);
        assert_eq!(second.resolution_note.as_deref(), Some("handled"));
    }

    #[tokio::test]
    async fn unknown_ticket_is_reported_as_missing() {
        let orch = orchestrator().await;
        let err = orch.resolve_ticket(Uuid::now_v7(), None).await.unwrap_err();
        assert!(matches!(err, TriageError::TicketNotFound(_)));
    }

    #[tokio::test]
    async fn low_confidence_first_turn_escalates_to_human_review() {
        let orch = orchestrator().await;
        let outcome = orch.handle_turn("c-1", "qwfpgjluy").await.unwrap();
        assert_eq!(outcome.state, TriageState::Escalated);
        assert_eq!(outcome.urgency, UrgencyTier::Urgent);
        assert!(outcome.requires_handoff);
        assert_eq!(orch.store().list_open_tickets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn red_flag_upgrades_an_open_urgent_ticket_to_emergency() {
        let orch = orchestrator().await;
        // Low-confidence routing opens an urgent ticket first.
        orch.handle_turn("c-1", "qwfpgjluy").await.unwrap();
        let tickets = orch.store().list_open_tickets().await.unwrap();
        assert_eq!(tickets[0].urgency, UrgencyTier::Urgent);

        let outcome = orch.handle_turn("c-1", "now I have chest pain").await.unwrap();
        assert_eq!(outcome.state, TriageState::Emergency);
        assert_eq!(outcome.urgency, UrgencyTier::Emergency);

        let tickets = orch.store().list_open_tickets().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].urgency, UrgencyTier::Emergency);

        let trail = orch.store().audit_trail("c-1").await.unwrap();
        let escalations = trail
            .iter()
            .filter(|e| e.kind == AuditKind::Escalation)
            .count();
        assert_eq!(escalations, 2, "ticket open plus urgency upgrade");

        // Further flagged turns leave the already-emergency ticket alone.
        orch.handle_turn("c-1", "still chest pain").await.unwrap();
        let trail = orch.store().audit_trail("c-1").await.unwrap();
        assert_eq!(
            trail
                .iter()
                .filter(|e| e.kind == AuditKind::Escalation)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn emergency_resolution_steps_down_through_escalated() {
        let orch = orchestrator().await;
        orch.handle_turn("c-1", "crushing chest pain").await.unwrap();
        let ticket_id = orch
            .store()
            .load_session("c-1")
            .await
            .unwrap()
            .unwrap()
            .open_ticket
            .unwrap();

        orch.resolve_ticket(ticket_id, None).await.unwrap();

        let trail = orch.store().audit_trail("c-1").await.unwrap();
        let tail: Vec<(TriageState, TriageState)> = trail
            .iter()
            .rev()
            .take(2)
            .map(|e| (e.previous_state, e.new_state))
            .collect();
        assert_eq!(
            tail,
            vec![
                (TriageState::Escalated, TriageState::Closed),
                (TriageState::Emergency, TriageState::Escalated),
            ]
        );
    }

    #[tokio::test]
    async fn detector_fault_pins_the_session_to_emergency() {
        let mut orch = orchestrator().await;
        orch.red_flags.force_fault = true;

        let outcome = orch.handle_turn("c-1", "hello").await.unwrap();
        assert_eq!(outcome.state, TriageState::Emergency);
        assert!(outcome.requires_handoff);

        let session = orch.store().load_session("c-1").await.unwrap().unwrap();
        assert!(session.red_flags.iter().any(|f| f == DETECTOR_FAULT_FLAG));
        assert_eq!(orch.store().list_open_tickets().await.unwrap().len(), 1);

        // Still pinned on the next turn.
        let next = orch.handle_turn("c-1", "are you there").await.unwrap();
        assert_eq!(next.state, TriageState::Emergency);
    }

    #[tokio::test]
    async fn idle_conversation_locks_are_evicted() {
        let orch = orchestrator().await;
        for id in ["c-1", "c-2", "c-3"] {
            orch.handle_turn(id, "hello").await.unwrap();
        }
        orch.handle_turn("c-4", "hello").await.unwrap();
        // Acquiring for c-4 pruned the idle entries left by c-1..c-3.
        assert_eq!(orch.locks.tracked(), 1);
    }

    #[test]
    fn transition_table_covers_the_documented_graph() {
        use RoutingDecision as R;
        use TriageState as S;
        assert_eq!(
            next_state(S::Greeting, &R::BeginIntake, UrgencyTier::Pending),
            Some(S::Intake)
        );
        assert_eq!(
            next_state(S::Triage, &R::IntakeComplete, UrgencyTier::Routine),
            Some(S::Closed)
        );
        assert_eq!(
            next_state(S::Triage, &R::IntakeComplete, UrgencyTier::Urgent),
            Some(S::Escalated)
        );
        assert_eq!(
            next_state(S::Triage, &R::IntakeComplete, UrgencyTier::Emergency),
            Some(S::Emergency)
        );
        // Unmapped combinations fail closed at the call site.
        assert_eq!(next_state(S::Closed, &R::BeginIntake, UrgencyTier::Routine), None);
        assert_eq!(
            next_state(S::Triage, &R::IntakeComplete, UrgencyTier::Pending),
            None
        );
    }
}
