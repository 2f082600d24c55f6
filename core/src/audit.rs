use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::TriageState;

/// What kind of safety-relevant decision an audit event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuditKind {
    StateTransition,
    RedFlagTriggered,
    Escalation,
    ErrorFailsafe,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::StateTransition => "state-transition",
            AuditKind::RedFlagTriggered => "red-flag-triggered",
            AuditKind::Escalation => "escalation",
            AuditKind::ErrorFailsafe => "error-failsafe",
        }
    }
}

impl std::str::FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state-transition" => Ok(AuditKind::StateTransition),
            "red-flag-triggered" => Ok(AuditKind::RedFlagTriggered),
            "escalation" => Ok(AuditKind::Escalation),
            "error-failsafe" => Ok(AuditKind::ErrorFailsafe),
            other => Err(format!("unknown audit kind '{other}'")),
        }
    }
}

/// An audit event as emitted by the orchestrator, before the store assigns
/// its per-conversation sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub previous_state: TriageState,
    pub new_state: TriageState,
    /// Structured decision details. Stored encrypted; must never contain
    /// more raw user text than the decision needs.
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        kind: AuditKind,
        previous_state: TriageState,
        new_state: TriageState,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        AuditRecord {
            kind,
            previous_state,
            new_state,
            details,
            timestamp,
        }
    }
}

/// A committed audit event. Once written, never mutated or deleted; the
/// trail for a conversation, replayed in seq order, reconstructs every state
/// transition the session underwent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub conversation_id: String,
    /// Strictly increasing per conversation, assigned at commit time.
    pub seq: i64,
    pub kind: AuditKind,
    pub previous_state: TriageState,
    pub new_state: TriageState,
    pub details: serde_json::Value,
    pub integrity_token: String,
    pub timestamp: DateTime<Utc>,
}

/// Integrity token over the canonical event tuple. Computed against the
/// sealed payload so tampering with either the row metadata or the
/// ciphertext is detectable on read.
pub fn integrity_token(
    conversation_id: &str,
    seq: i64,
    kind: AuditKind,
    previous_state: TriageState,
    new_state: TriageState,
    sealed_payload: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(seq.to_be_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(previous_state.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(new_state.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(sealed_payload.as_bytes());
    hex::encode(hasher.finalize())
}
