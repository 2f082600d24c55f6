use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{TriageState, UrgencyTier};

/// A typed intake field value. Intake answers are structured data, never
/// free-floating strings inside the session aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    List(Vec<String>),
    Text(String),
}

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// One triage conversation. Mutated exclusively by the orchestrator and
/// persisted encrypted; never physically deleted — a `Closed` session stays
/// queryable for audit purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Caller-supplied opaque conversation id. Treated as untrusted input.
    pub conversation_id: String,
    pub state: TriageState,
    /// Structured intake fields collected so far, keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Red-flag identifiers that have fired over the session's lifetime.
    pub red_flags: Vec<String>,
    /// Clinical rule ids triggered by the most recent evaluation.
    pub triggered_rules: Vec<String>,
    /// Urgency tier from the most recent rules evaluation.
    pub urgency: UrgencyTier,
    /// Advisory risk score. Recomputed each turn from current evidence;
    /// never feeds the state transition.
    pub risk_score: f64,
    /// Open handoff ticket, when one exists.
    pub open_ticket: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(conversation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Session {
            conversation_id: conversation_id.into(),
            state: TriageState::Idle,
            fields: BTreeMap::new(),
            red_flags: Vec::new(),
            triggered_rules: Vec::new(),
            urgency: UrgencyTier::Pending,
            risk_score: 0.0,
            open_ticket: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field_integer(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(FieldValue::as_integer)
    }

    pub fn field_text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    pub fn field_list(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).and_then(FieldValue::as_list)
    }

    /// Record a red flag, keeping the list deduplicated and sorted so the
    /// session serializes deterministically.
    pub fn record_red_flag(&mut self, flag: &str) {
        if !self.red_flags.iter().any(|f| f == flag) {
            self.red_flags.push(flag.to_string());
            self.red_flags.sort();
        }
    }
}

/// Who produced a transcript entry. `Human` is a clinical operator acting
/// through the admin surface (e.g. a ticket resolution note).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Human,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Human => "human",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "human" => Ok(Role::Human),
            other => Err(format!("unknown transcript role '{other}'")),
        }
    }
}

/// One line of conversation history, as returned by `get_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_round_trip_untagged() {
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), FieldValue::Integer(34));
        fields.insert(
            "allergies".to_string(),
            FieldValue::List(vec!["penicillin".to_string()]),
        );
        fields.insert(
            "chief_complaint".to_string(),
            FieldValue::Text("mild cough".to_string()),
        );

        let json = serde_json::to_string(&fields).unwrap();
        let back: BTreeMap<String, FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
        assert_eq!(back["age"].as_integer(), Some(34));
        assert_eq!(back["chief_complaint"].as_text(), Some("mild cough"));
    }

    #[test]
    fn red_flags_stay_deduplicated_and_sorted() {
        let mut session = Session::new("c-1", Utc::now());
        session.record_red_flag("chest_pain");
        session.record_red_flag("difficulty_breathing");
        session.record_red_flag("chest_pain");
        assert_eq!(session.red_flags, vec!["chest_pain", "difficulty_breathing"]);
    }
}
