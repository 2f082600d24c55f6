use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use celine_core::error::TriageError;
use celine_core::session::Session;

/// One externally configured clinical rule: a predicate over structured
/// intake fields and the urgency tier it implies. Rules are data, not code.
#[derive(Debug, Clone, Deserialize)]
pub struct ClinicalRule {
    pub id: String,
    pub urgency: RuleUrgency,
    /// Matches when any phrase appears in the symptom text blob.
    #[serde(default)]
    pub phrases_any: Vec<String>,
    /// Every phrase must appear in the symptom text blob.
    #[serde(default)]
    pub phrases_all: Vec<String>,
    /// Patient must be at least this old. An unknown age never matches.
    #[serde(default)]
    pub min_age: Option<i64>,
    /// Onset must be stated in days and be at most this many.
    #[serde(default)]
    pub max_duration_days: Option<i64>,
    /// Stated severity (1–10) must be at least this.
    #[serde(default)]
    pub severity_min: Option<i64>,
}

/// Tiers a rule may assign. `pending` is a computed tier, never a
/// configured one, so it is not representable here.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RuleUrgency {
    Routine,
    Urgent,
    Emergency,
}

impl From<RuleUrgency> for celine_core::state::UrgencyTier {
    fn from(value: RuleUrgency) -> Self {
        match value {
            RuleUrgency::Routine => celine_core::state::UrgencyTier::Routine,
            RuleUrgency::Urgent => celine_core::state::UrgencyTier::Urgent,
            RuleUrgency::Emergency => celine_core::state::UrgencyTier::Emergency,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    rules: Vec<ClinicalRule>,
}

/// An immutable, validated rule set snapshot.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<ClinicalRule>,
}

impl RuleSet {
    pub fn from_json_str(json: &str) -> Result<Self, TriageError> {
        let document: RuleDocument = serde_json::from_str(json)
            .map_err(|e| TriageError::RuleEvaluation(format!("malformed rule document: {e}")))?;
        Self::from_rules(document.rules)
    }

    pub fn load(path: &Path) -> Result<Self, TriageError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            TriageError::RuleEvaluation(format!("cannot read rules at {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    fn from_rules(rules: Vec<ClinicalRule>) -> Result<Self, TriageError> {
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(TriageError::RuleEvaluation(
                    "rule with empty id".to_string(),
                ));
            }
            if rule.phrases_any.is_empty()
                && rule.phrases_all.is_empty()
                && rule.min_age.is_none()
                && rule.max_duration_days.is_none()
                && rule.severity_min.is_none()
            {
                return Err(TriageError::RuleEvaluation(format!(
                    "rule '{}' has no predicate and would match every session",
                    rule.id
                )));
            }
            if let Some(severity) = rule.severity_min {
                if !(1..=10).contains(&severity) {
                    return Err(TriageError::RuleEvaluation(format!(
                        "rule '{}' severity_min {severity} outside 1..=10",
                        rule.id
                    )));
                }
            }
        }
        Ok(RuleSet { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of one rules evaluation over the accumulated field set.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleVerdict {
    pub tier: celine_core::state::UrgencyTier,
    pub triggered_rules: Vec<String>,
}

/// Handle over the current rule set snapshot. `reload` swaps in a new
/// immutable snapshot; an evaluation in flight keeps the one it started
/// with, so a reload is never visible mid-evaluation.
pub struct RulesHandle {
    current: RwLock<Arc<RuleSet>>,
    source: Option<std::path::PathBuf>,
}

impl RulesHandle {
    pub fn new(set: RuleSet) -> Self {
        RulesHandle {
            current: RwLock::new(Arc::new(set)),
            source: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, TriageError> {
        let set = RuleSet::load(path)?;
        Ok(RulesHandle {
            current: RwLock::new(Arc::new(set)),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot(&self) -> Result<Arc<RuleSet>, TriageError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| TriageError::RuleEvaluation("rule snapshot lock poisoned".to_string()))
    }

    /// Explicit administrative reload from the configured source document.
    /// A malformed document leaves the current snapshot untouched.
    pub fn reload(&self) -> Result<usize, TriageError> {
        let path = self.source.as_deref().ok_or_else(|| {
            TriageError::RuleEvaluation("rules handle has no source document".to_string())
        })?;
        let set = RuleSet::load(path)?;
        let count = set.len();
        let mut guard = self
            .current
            .write()
            .map_err(|_| TriageError::RuleEvaluation("rule snapshot lock poisoned".to_string()))?;
        *guard = Arc::new(set);
        tracing::info!(rules = count, path = %path.display(), "clinical rules reloaded");
        Ok(count)
    }

    /// Evaluate every rule against the current structured field set.
    /// Urgency tier for the turn is the maximum tier among matching rules;
    /// no match with incomplete intake is `Pending` — undeterminable, never
    /// assumed routine. Idempotent for an unchanged field set.
    pub fn evaluate(
        &self,
        session: &Session,
        intake_complete: bool,
    ) -> Result<RuleVerdict, TriageError> {
        let snapshot = self.snapshot()?;
        let blob = symptom_blob(session);

        let mut tier = celine_core::state::UrgencyTier::Pending;
        let mut triggered = Vec::new();

        for rule in &snapshot.rules {
            if rule_matches(rule, session, &blob) {
                triggered.push(rule.id.clone());
                tier = tier.max(rule.urgency.into());
            }
        }

        if triggered.is_empty() && intake_complete {
            tier = celine_core::state::UrgencyTier::Routine;
        }

        Ok(RuleVerdict {
            tier,
            triggered_rules: triggered,
        })
    }
}

/// Lowercased text blob of the symptom-bearing fields.
fn symptom_blob(session: &Session) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(complaint) = session.field_text("chief_complaint") {
        parts.push(complaint);
    }
    for field in ["associated_symptoms", "chronic_conditions"] {
        if let Some(values) = session.field_list(field) {
            parts.extend(values.iter().map(String::as_str));
        }
    }
    parts.join(" ").to_lowercase()
}

fn rule_matches(rule: &ClinicalRule, session: &Session, blob: &str) -> bool {
    if !rule.phrases_any.is_empty()
        && !rule
            .phrases_any
            .iter()
            .any(|phrase| blob.contains(&phrase.to_lowercase()))
    {
        return false;
    }
    if !rule
        .phrases_all
        .iter()
        .all(|phrase| blob.contains(&phrase.to_lowercase()))
    {
        return false;
    }

    if let Some(min_age) = rule.min_age {
        match session.field_integer("age") {
            Some(age) if age >= min_age => {}
            _ => return false,
        }
    }

    if let Some(max_days) = rule.max_duration_days {
        let Some(onset) = session.field_text("onset_time") else {
            return false;
        };
        if !onset.to_lowercase().contains("day") {
            return false;
        }
        // A day count that cannot be read is a non-match; an absurd or
        // overflowing duration must not slip through the gate.
        match first_number(onset) {
            Some(days) if days <= max_days => {}
            _ => return false,
        }
    }

    if let Some(severity_min) = rule.severity_min {
        match session.field_integer("severity") {
            Some(severity) if severity >= severity_min => {}
            _ => return false,
        }
    }

    true
}

fn first_number(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
