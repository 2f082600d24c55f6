use celine_core::state::UrgencyTier;

/// Fixed emergency instruction text. Returned verbatim whenever a red flag
/// fires; no templating on this path.
pub const EMERGENCY_RESPONSE: &str = "This may be a medical emergency. Please call your local \
emergency number now or go to the nearest emergency department. I have alerted the on-call \
clinical team and they are being notified immediately.";

pub const ESCALATED_RESPONSE: &str = "Based on what you've told me, a clinician should review \
your case promptly. I have created a priority ticket for the on-call team; please stay \
reachable, and if your symptoms worsen call your local emergency number.";

pub const ROUTINE_RESPONSE: &str = "Based on what you've told me, this looks suitable for a \
routine appointment. The front desk will follow up to schedule it; if anything worsens in the \
meantime, contact us again or call your local emergency number.";

/// Deterministic patient-facing disposition text and handoff ticket
/// summaries. Free-form generation never reaches this surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscalationAgent;

impl EscalationAgent {
    pub fn disposition(&self, tier: UrgencyTier) -> &'static str {
        match tier {
            UrgencyTier::Emergency => EMERGENCY_RESPONSE,
            UrgencyTier::Urgent => ESCALATED_RESPONSE,
            UrgencyTier::Routine | UrgencyTier::Pending => ROUTINE_RESPONSE,
        }
    }

    /// Ticket rationale from matched identifiers. Quotes identifiers, not
    /// raw utterance text; the transcript already holds the full context.
    pub fn ticket_summary(
        &self,
        tier: UrgencyTier,
        red_flags: &[String],
        triggered_rules: &[String],
    ) -> String {
        let mut reasons: Vec<&str> = Vec::new();
        reasons.extend(red_flags.iter().map(String::as_str));
        reasons.extend(triggered_rules.iter().map(String::as_str));
        if reasons.is_empty() {
            format!("{tier} handoff: low-confidence routing, human review requested")
        } else {
            format!("{tier} handoff: {}", reasons.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_tier_maps_to_fixed_text() {
        assert_eq!(
            EscalationAgent.disposition(UrgencyTier::Emergency),
            EMERGENCY_RESPONSE
        );
        assert_eq!(
            EscalationAgent.disposition(UrgencyTier::Urgent),
            ESCALATED_RESPONSE
        );
        assert_eq!(
            EscalationAgent.disposition(UrgencyTier::Routine),
            ROUTINE_RESPONSE
        );
    }

    #[test]
    fn ticket_summary_names_the_matched_identifiers() {
        let summary = EscalationAgent.ticket_summary(
            UrgencyTier::Emergency,
            &["chest_pain".to_string()],
            &["cardiac_urgent".to_string()],
        );
        assert!(summary.contains("emergency"));
        assert!(summary.contains("chest_pain"));
        assert!(summary.contains("cardiac_urgent"));
    }

    #[test]
    fn ticket_summary_without_identifiers_names_human_review() {
        let summary = EscalationAgent.ticket_summary(UrgencyTier::Urgent, &[], &[]);
        assert!(summary.contains("human review"));
    }
}
