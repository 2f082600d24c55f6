use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::UrgencyTier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Resolved,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "resolved" => Ok(TicketStatus::Resolved),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// A durable request for human clinical review, created on escalation or
/// emergency. Owned by the admin handoff queue; mutated only through the
/// explicit resolve operation, never by the orchestrator directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffTicket {
    pub id: Uuid,
    pub conversation_id: String,
    pub urgency: UrgencyTier,
    /// Short rationale built from matched rule/red-flag identifiers plus the
    /// minimum necessary quoted context.
    pub summary: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl HandoffTicket {
    pub fn open(
        conversation_id: impl Into<String>,
        urgency: UrgencyTier,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        HandoffTicket {
            id: Uuid::now_v7(),
            conversation_id: conversation_id.into(),
            urgency,
            summary: summary.into(),
            status: TicketStatus::Open,
            created_at: now,
            resolved_at: None,
            resolution_note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_tickets_start_unresolved() {
        let ticket = HandoffTicket::open("c-1", UrgencyTier::Urgent, "chest pain rule", Utc::now());
        assert_eq!(ticket.status, TicketStatus::Open);
        assert!(ticket.resolved_at.is_none());
        assert!(ticket.resolution_note.is_none());
    }
}
