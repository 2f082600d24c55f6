use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum classifier confidence below which a turn is routed to human
/// review instead of being guessed at.
pub const MIN_INTENT_CONFIDENCE: f64 = 0.55;

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|good\s+(morning|afternoon|evening))\b")
        .expect("valid greeting regex")
});
static APPOINTMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(book|schedule|appointment|follow[- ]?up)\b").expect("valid appointment regex")
});
static ADMIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(billing|insurance|hours|location|records)\b").expect("valid admin regex")
});
static MEDICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pain|fever|cough|rash|vomit|nausea|headache|dizzy|bleeding|pregnan|symptom|breath)")
        .expect("valid medical regex")
});
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(time|date|today)\b").expect("valid time regex"));
static SERVICES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(service|services|offer|help with|what can you do)\b")
        .expect("valid services regex")
});
static STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(robotic|bot|human|too scripted)\b").expect("valid style regex")
});
static IDENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(who\s+are\s+you|what('s|\s+is)\s+your\s+name|ur\s+name|your\s+name)\b")
        .expect("valid identity regex")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    TimeQuestion,
    ServicesQuestion,
    StyleFeedback,
    MedicalSymptom,
    AppointmentRequest,
    AdminQuestion,
    Unclear,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::TimeQuestion => "time_question",
            Intent::ServicesQuestion => "services_question",
            Intent::StyleFeedback => "style_feedback",
            Intent::MedicalSymptom => "medical_symptom",
            Intent::AppointmentRequest => "appointment_request",
            Intent::AdminQuestion => "admin_question",
            Intent::Unclear => "unclear",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
}

/// Rule-based text classifier. Pure function of the utterance; checked in a
/// fixed order so classification is reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn classify(&self, utterance: &str) -> IntentResult {
        let text = utterance.trim();
        if GREETING_RE.is_match(text) {
            return IntentResult {
                intent: Intent::Greeting,
                confidence: 0.98,
            };
        }
        if TIME_RE.is_match(text) {
            return IntentResult {
                intent: Intent::TimeQuestion,
                confidence: 0.9,
            };
        }
        if SERVICES_RE.is_match(text) {
            return IntentResult {
                intent: Intent::ServicesQuestion,
                confidence: 0.9,
            };
        }
        if STYLE_RE.is_match(text) {
            return IntentResult {
                intent: Intent::StyleFeedback,
                confidence: 0.89,
            };
        }
        if MEDICAL_RE.is_match(text) {
            return IntentResult {
                intent: Intent::MedicalSymptom,
                confidence: 0.88,
            };
        }
        if APPOINTMENT_RE.is_match(text) {
            return IntentResult {
                intent: Intent::AppointmentRequest,
                confidence: 0.85,
            };
        }
        if ADMIN_RE.is_match(text) {
            return IntentResult {
                intent: Intent::AdminQuestion,
                confidence: 0.84,
            };
        }
        IntentResult {
            intent: Intent::Unclear,
            confidence: 0.4,
        }
    }
}

/// Identity questions get a fixed reply before any routing happens.
pub fn is_identity_question(utterance: &str) -> bool {
    IDENTITY_RE.is_match(utterance.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_win_over_other_patterns() {
        let result = IntentClassifier.classify("Hello, I need to book an appointment");
        assert_eq!(result.intent, Intent::Greeting);
    }

    #[test]
    fn medical_symptoms_are_recognized() {
        let result = IntentClassifier.classify("I've had a cough and a mild headache");
        assert_eq!(result.intent, Intent::MedicalSymptom);
        assert!(result.confidence >= MIN_INTENT_CONFIDENCE);
    }

    #[test]
    fn unclear_text_scores_below_the_routing_threshold() {
        let result = IntentClassifier.classify("xyzzy");
        assert_eq!(result.intent, Intent::Unclear);
        assert!(result.confidence < MIN_INTENT_CONFIDENCE);
    }

    #[test]
    fn identity_questions_are_detected() {
        assert!(is_identity_question("who are you?"));
        assert!(is_identity_question("What is your name"));
        assert!(!is_identity_question("what are your hours"));
    }

    #[test]
    fn classification_is_deterministic() {
        let first = IntentClassifier.classify("can I schedule a follow-up");
        let second = IntentClassifier.classify("can I schedule a follow-up");
        assert_eq!(first.intent, second.intent);
        assert_eq!(first.confidence, second.confidence);
    }
}
