use serde::{Deserialize, Serialize};

/// Conversation state. Transitions are monotonic along the allowed graph;
/// `Emergency` is reachable from every state and supersedes any
/// agent-proposed transition for the turn it fires in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageState {
    Idle,
    Greeting,
    Intake,
    Triage,
    Emergency,
    Escalated,
    Closed,
}

impl TriageState {
    pub fn as_str(self) -> &'static str {
        match self {
            TriageState::Idle => "IDLE",
            TriageState::Greeting => "GREETING",
            TriageState::Intake => "INTAKE",
            TriageState::Triage => "TRIAGE",
            TriageState::Emergency => "EMERGENCY",
            TriageState::Escalated => "ESCALATED",
            TriageState::Closed => "CLOSED",
        }
    }

    /// States that require an open ticket to be resolved by a human before
    /// the conversation can move again.
    pub fn is_pinned(self) -> bool {
        matches!(self, TriageState::Emergency | TriageState::Escalated)
    }
}

impl std::fmt::Display for TriageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(TriageState::Idle),
            "GREETING" => Ok(TriageState::Greeting),
            "INTAKE" => Ok(TriageState::Intake),
            "TRIAGE" => Ok(TriageState::Triage),
            "EMERGENCY" => Ok(TriageState::Emergency),
            "ESCALATED" => Ok(TriageState::Escalated),
            "CLOSED" => Ok(TriageState::Closed),
            other => Err(format!("unknown triage state '{other}'")),
        }
    }
}

/// Discrete urgency ordinal computed by the clinical rules engine.
/// `Pending` is an explicit non-terminal tier: intake that is still
/// incomplete and matches no rule is undeterminable, never routine.
/// Variant order gives `Pending < Routine < Urgent < Emergency`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    #[default]
    Pending,
    Routine,
    Urgent,
    Emergency,
}

impl UrgencyTier {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyTier::Pending => "pending",
            UrgencyTier::Routine => "routine",
            UrgencyTier::Urgent => "urgent",
            UrgencyTier::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for UrgencyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UrgencyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UrgencyTier::Pending),
            "routine" => Ok(UrgencyTier::Routine),
            "urgent" => Ok(UrgencyTier::Urgent),
            "emergency" => Ok(UrgencyTier::Emergency),
            other => Err(format!("unknown urgency tier '{other}'")),
        }
    }
}

/// What the state-bound agent decided for this turn. The orchestrator maps
/// `(current state, routing, urgency tier)` through a fixed table; no agent
/// ever writes the next state itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "routing")]
pub enum RoutingDecision {
    /// Front-desk style reply, conversation stays where it is.
    FrontDesk,
    /// A medical symptom was recognized; structured intake begins.
    BeginIntake,
    /// Intake asked its next question and is still collecting fields.
    ContinueIntake,
    /// Every relevant intake question has an answer.
    IntakeComplete,
    /// The classifier was not confident enough to route safely.
    HumanReview,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::FrontDesk => "front_desk",
            RoutingDecision::BeginIntake => "begin_intake",
            RoutingDecision::ContinueIntake => "continue_intake",
            RoutingDecision::IntakeComplete => "intake_complete",
            RoutingDecision::HumanReview => "human_review",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_tiers_order_toward_higher_urgency() {
        assert!(UrgencyTier::Pending < UrgencyTier::Routine);
        assert!(UrgencyTier::Routine < UrgencyTier::Urgent);
        assert!(UrgencyTier::Urgent < UrgencyTier::Emergency);
        assert_eq!(
            UrgencyTier::Urgent.max(UrgencyTier::Emergency),
            UrgencyTier::Emergency
        );
    }

    #[test]
    fn pinned_states_are_exactly_emergency_and_escalated() {
        for state in [
            TriageState::Idle,
            TriageState::Greeting,
            TriageState::Intake,
            TriageState::Triage,
            TriageState::Closed,
        ] {
            assert!(!state.is_pinned(), "{state} must not be pinned");
        }
        assert!(TriageState::Emergency.is_pinned());
        assert!(TriageState::Escalated.is_pinned());
    }

    #[test]
    fn state_serializes_to_screaming_snake_case() {
        let json = serde_json::to_string(&TriageState::Emergency).unwrap();
        assert_eq!(json, "\"EMERGENCY\"");
    }
}
