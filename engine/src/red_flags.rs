use std::panic::{AssertUnwindSafe, catch_unwind};

use celine_core::session::Session;

/// Sentinel flag emitted when the detector itself faults. A broken detector
/// must read as "emergency", never as "no flags".
pub const DETECTOR_FAULT_FLAG: &str = "detector-fault";

/// Ordered pattern table: red-flag identifier and the phrases that trigger
/// it. Matching is lowercase substring containment on the raw utterance —
/// this runs before any other interpretation layer, so no upstream agent can
/// reinterpret away a genuine emergency signal.
const RED_FLAG_RULES: &[(&str, &[&str])] = &[
    (
        "difficulty_breathing",
        &[
            "difficulty breathing",
            "shortness of breath",
            "can't breathe",
            "cannot breathe",
        ],
    ),
    ("chest_pain", &["chest pain"]),
    (
        "severe_bleeding",
        &["severe bleeding", "bleeding heavily", "won't stop bleeding"],
    ),
    (
        "loss_of_consciousness",
        &["loss of consciousness", "passed out", "fainted"],
    ),
    (
        "stroke_symptoms",
        &["face droop", "slurred speech", "one-sided weakness", "stroke"],
    ),
    ("seizure", &["seizure", "convulsion"]),
    (
        "severe_allergic_reaction",
        &["anaphylaxis", "throat swelling", "severe allergic reaction"],
    ),
    (
        "altered_mental_state",
        &[
            "confused and disoriented",
            "altered mental state",
            "not making sense",
        ],
    ),
    (
        "high_fever_in_infant",
        &["infant with fever", "baby fever", "newborn fever"],
    ),
    (
        "signs_of_shock",
        &[
            "cold clammy skin",
            "weak rapid pulse",
            "signs of shock",
            "in shock",
        ],
    ),
    ("dying_statement", &["i am dying", "i'm dying"]),
    (
        "collapsed_statement",
        &["she collapsed", "he collapsed", "collapsed"],
    ),
];

/// Stateless classifier over a single utterance. Pure function of
/// (utterance, session fields) → set of matched red-flag identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedFlagEngine {
    /// Fault injection point, so the failsafe branch stays under test.
    #[cfg(test)]
    pub(crate) force_fault: bool,
}

impl RedFlagEngine {
    /// Total detection: never raises. A clean non-match yields no flags; an
    /// internal fault yields the sentinel flag instead.
    pub fn detect(&self, utterance: &str, session: &Session) -> Vec<String> {
        match catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if self.force_fault {
                panic!("injected detector fault");
            }
            scan(utterance, session)
        })) {
            Ok(flags) => flags,
            Err(_) => {
                tracing::error!("red-flag detector fault; failing toward emergency");
                vec![DETECTOR_FAULT_FLAG.to_string()]
            }
        }
    }
}

fn scan(utterance: &str, session: &Session) -> Vec<String> {
    let text = utterance.to_lowercase();
    let mut hits: Vec<String> = Vec::new();

    for (id, phrases) in RED_FLAG_RULES {
        if phrases.iter().any(|phrase| text.contains(phrase)) {
            hits.push((*id).to_string());
        }
    }

    // Combined demographic check: any fever mention in an infant is an
    // emergency even without an explicit infant-fever phrase.
    if let Some(age) = session.field_integer("age") {
        if age < 1 && text.contains("fever") {
            hits.push("high_fever_in_infant".to_string());
        }
    }

    hits.sort();
    hits.dedup();
    hits
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use celine_core::session::FieldValue;

    use super::*;

    fn session() -> Session {
        Session::new("c-1", Utc::now())
    }

    #[test]
    fn clean_utterance_yields_no_flags() {
        let flags = RedFlagEngine::default().detect("mild cough for 2 days", &session());
        assert!(flags.is_empty());
    }

    #[test]
    fn chest_pain_with_breathing_trouble_matches_both() {
        let flags = RedFlagEngine::default().detect(
            "I have chest pain and severe shortness of breath",
            &session(),
        );
        assert_eq!(flags, vec!["chest_pain", "difficulty_breathing"]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let flags = RedFlagEngine::default().detect("I THINK I'M DYING", &session());
        assert_eq!(flags, vec!["dying_statement"]);
    }

    #[test]
    fn infant_fever_combines_age_field_with_text() {
        let mut session = session();
        session
            .fields
            .insert("age".to_string(), FieldValue::Integer(0));
        let flags = RedFlagEngine::default().detect("running a fever since last night", &session);
        assert_eq!(flags, vec!["high_fever_in_infant"]);

        // An adult with the same wording is not an infant-fever emergency.
        session
            .fields
            .insert("age".to_string(), FieldValue::Integer(30));
        assert!(
            RedFlagEngine::default()
                .detect("running a fever since last night", &session)
                .is_empty()
        );
    }

    #[test]
    fn detector_fault_yields_the_sentinel_flag() {
        let engine = RedFlagEngine { force_fault: true };
        let flags = engine.detect("mild cough for 2 days", &session());
        assert_eq!(flags, vec![DETECTOR_FAULT_FLAG]);
    }

    #[test]
    fn repeated_matches_stay_deduplicated_and_sorted() {
        let flags = RedFlagEngine::default().detect(
            "seizure after seizure, then she collapsed with chest pain",
            &session(),
        );
        assert_eq!(flags, vec!["chest_pain", "collapsed_statement", "seizure"]);
    }
}
