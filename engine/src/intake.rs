use std::sync::LazyLock;

use regex::Regex;

use celine_core::session::{FieldValue, Session};

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid digits regex"));
static LIST_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",|;|\band\b").expect("valid list split regex"));

/// How a free-text answer becomes a typed field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parser {
    /// Whole years; "N months" under a year records as 0.
    Age,
    Text,
    /// 1–10 scale, clamped.
    Severity,
    /// Comma/semicolon/"and"-separated list.
    List,
}

pub struct IntakeQuestion {
    pub field: &'static str,
    pub prompt: &'static str,
    parser: Parser,
    relevant: Option<fn(&Session) -> bool>,
}

fn pregnancy_relevant(session: &Session) -> bool {
    matches!(
        session
            .field_text("sex")
            .map(|s| s.trim().to_lowercase())
            .as_deref(),
        Some("female" | "f" | "woman")
    )
}

/// Fixed question order. One question at a time, irrelevant questions are
/// skipped, and a question stays pending until its answer parses.
const QUESTIONS: &[IntakeQuestion] = &[
    IntakeQuestion {
        field: "age",
        prompt: "How old is the patient?",
        parser: Parser::Age,
        relevant: None,
    },
    IntakeQuestion {
        field: "sex",
        prompt: "What sex was assigned at birth?",
        parser: Parser::Text,
        relevant: None,
    },
    IntakeQuestion {
        field: "pregnancy_status",
        prompt: "Is the patient currently pregnant or possibly pregnant?",
        parser: Parser::Text,
        relevant: Some(pregnancy_relevant),
    },
    IntakeQuestion {
        field: "chief_complaint",
        prompt: "What is the main symptom or concern right now?",
        parser: Parser::Text,
        relevant: None,
    },
    IntakeQuestion {
        field: "onset_time",
        prompt: "When did this problem start?",
        parser: Parser::Text,
        relevant: None,
    },
    IntakeQuestion {
        field: "severity",
        prompt: "On a scale of 1 to 10, how severe is it now?",
        parser: Parser::Severity,
        relevant: None,
    },
    IntakeQuestion {
        field: "associated_symptoms",
        prompt: "Any other symptoms with it?",
        parser: Parser::List,
        relevant: None,
    },
    IntakeQuestion {
        field: "chronic_conditions",
        prompt: "Any chronic health conditions?",
        parser: Parser::List,
        relevant: None,
    },
    IntakeQuestion {
        field: "medications",
        prompt: "Any regular medications? (optional)",
        parser: Parser::List,
        relevant: None,
    },
    IntakeQuestion {
        field: "allergies",
        prompt: "Any known allergies? (optional)",
        parser: Parser::List,
        relevant: None,
    },
];

/// Structured one-question-at-a-time intake driver. Pure function of
/// (session fields, utterance) → field writes and the next pending question.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntakeAgent;

impl IntakeAgent {
    /// Seed the chief complaint from the utterance that triggered intake,
    /// so the patient is not asked to repeat their main symptom.
    pub fn begin(&self, session: &mut Session, utterance: &str) {
        let complaint = utterance.trim();
        if !complaint.is_empty() {
            session.fields.insert(
                "chief_complaint".to_string(),
                FieldValue::Text(complaint.to_string()),
            );
        }
    }

    /// Record the utterance as the answer to the currently pending question.
    /// Unparseable answers leave the question pending so it is asked again.
    pub fn record_answer(&self, session: &mut Session, utterance: &str) {
        let Some(question) = self.next_question(session) else {
            return;
        };
        let value = utterance.trim();
        if value.is_empty() {
            return;
        }

        let parsed = match question.parser {
            Parser::Age => parse_age(value).map(FieldValue::Integer),
            Parser::Text => Some(FieldValue::Text(value.to_string())),
            Parser::Severity => parse_severity(value).map(FieldValue::Integer),
            Parser::List => Some(FieldValue::List(parse_list(value))),
        };

        if let Some(parsed) = parsed {
            session.fields.insert(question.field.to_string(), parsed);
        }
    }

    /// The first relevant question without an answer, or `None` when intake
    /// is complete.
    pub fn next_question(&self, session: &Session) -> Option<&'static IntakeQuestion> {
        QUESTIONS.iter().find(|question| {
            if session.fields.contains_key(question.field) {
                return false;
            }
            match question.relevant {
                Some(relevant) => relevant(session),
                None => true,
            }
        })
    }

    pub fn is_complete(&self, session: &Session) -> bool {
        self.next_question(session).is_none()
    }
}

fn parse_age(value: &str) -> Option<i64> {
    let digits = DIGITS_RE.find(value)?;
    let mut age: i64 = digits.as_str().parse().ok()?;
    if value.to_lowercase().contains("month") && age < 12 {
        age = 0;
    }
    Some(age)
}

fn parse_severity(value: &str) -> Option<i64> {
    let digits = DIGITS_RE.find(value)?;
    let severity: i64 = digits.as_str().parse().ok()?;
    Some(severity.clamp(1, 10))
}

fn parse_list(value: &str) -> Vec<String> {
    if value.to_lowercase().trim() == "none" || value.trim() == "no" {
        return Vec::new();
    }
    LIST_SPLIT_RE
        .split(value)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn session() -> Session {
        Session::new("c-1", Utc::now())
    }

    #[test]
    fn first_question_is_age() {
        let question = IntakeAgent.next_question(&session()).unwrap();
        assert_eq!(question.field, "age");
    }

    #[test]
    fn unparseable_age_keeps_the_question_pending() {
        let mut session = session();
        IntakeAgent.record_answer(&mut session, "not sure");
        assert_eq!(IntakeAgent.next_question(&session).unwrap().field, "age");

        IntakeAgent.record_answer(&mut session, "34 years");
        assert_eq!(session.field_integer("age"), Some(34));
        assert_eq!(IntakeAgent.next_question(&session).unwrap().field, "sex");
    }

    #[test]
    fn infant_age_in_months_records_as_zero_years() {
        let mut session = session();
        IntakeAgent.record_answer(&mut session, "6 months");
        assert_eq!(session.field_integer("age"), Some(0));
    }

    #[test]
    fn pregnancy_question_is_skipped_for_male_patients() {
        let mut session = session();
        IntakeAgent.record_answer(&mut session, "40");
        IntakeAgent.record_answer(&mut session, "male");
        assert_eq!(
            IntakeAgent.next_question(&session).unwrap().field,
            "chief_complaint"
        );
    }

    #[test]
    fn pregnancy_question_is_asked_for_female_patients() {
        let mut session = session();
        IntakeAgent.record_answer(&mut session, "28");
        IntakeAgent.record_answer(&mut session, "Female");
        assert_eq!(
            IntakeAgent.next_question(&session).unwrap().field,
            "pregnancy_status"
        );
    }

    #[test]
    fn begin_seeds_chief_complaint_and_skips_that_question() {
        let mut session = session();
        IntakeAgent.begin(&mut session, "I have a mild cough");
        IntakeAgent.record_answer(&mut session, "25");
        IntakeAgent.record_answer(&mut session, "male");
        assert_eq!(
            IntakeAgent.next_question(&session).unwrap().field,
            "onset_time"
        );
        assert_eq!(session.field_text("chief_complaint"), Some("I have a mild cough"));
    }

    #[test]
    fn severity_is_clamped_to_scale() {
        let mut session = session();
        session
            .fields
            .insert("age".into(), FieldValue::Integer(30));
        session
            .fields
            .insert("sex".into(), FieldValue::Text("male".into()));
        session
            .fields
            .insert("chief_complaint".into(), FieldValue::Text("cough".into()));
        session
            .fields
            .insert("onset_time".into(), FieldValue::Text("yesterday".into()));
        IntakeAgent.record_answer(&mut session, "15 out of 10!!");
        assert_eq!(session.field_integer("severity"), Some(10));
    }

    #[test]
    fn list_answers_split_on_separators() {
        assert_eq!(
            parse_list("nausea, dizziness and fatigue"),
            vec!["nausea", "dizziness", "fatigue"]
        );
        assert!(parse_list("none").is_empty());
    }

    #[test]
    fn intake_completes_after_all_relevant_questions() {
        let mut session = session();
        IntakeAgent.begin(&mut session, "mild cough");
        for answer in ["30", "male", "2 days ago", "2", "none", "none", "none", "none"] {
            IntakeAgent.record_answer(&mut session, answer);
        }
        assert!(IntakeAgent.is_complete(&session));
    }
}
