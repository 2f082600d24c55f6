use celine_core::session::Session;

/// Advisory continuous risk score in `[0.0, 0.99]`, recomputed from the
/// current field set every turn. Surfaces in audit details and ticket
/// summaries only; routing and urgency never read it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskScoringAgent;

impl RiskScoringAgent {
    pub fn score(&self, session: &Session) -> f64 {
        let mut score: f64 = 0.1;

        if let Some(severity) = session.field_integer("severity") {
            score += severity as f64 / 15.0;
        }
        if session.field_integer("age").is_some_and(|age| age >= 65) {
            score += 0.15;
        }
        if mentions_pregnancy(session) {
            score += 0.1;
        }

        score.min(0.99)
    }
}

fn mentions_pregnancy(session: &Session) -> bool {
    let status = session
        .field_text("pregnancy_status")
        .map(str::to_lowercase)
        .unwrap_or_default();
    status.contains("pregnan") || status.trim() == "yes"
}
