use chrono::Utc;

use crate::intent::Intent;

pub const IDENTITY_REPLY: &str = "I am Celine, the hospital triage assistant. I can help with symptom triage or route front-desk requests.";

pub const GREETING_REPLY: &str =
    "Hello, I am the hospital triage assistant. Tell me how I can help today.";

/// Fixed, deterministic replies for non-clinical requests. A closed match
/// per intent; no free-form generation anywhere on this path.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrontDeskAgent;

impl FrontDeskAgent {
    pub fn respond(&self, intent: Intent) -> String {
        match intent {
            Intent::Greeting => GREETING_REPLY.to_string(),
            Intent::TimeQuestion => {
                let now = Utc::now();
                format!(
                    "It is {} UTC on {}.",
                    now.format("%I:%M %p"),
                    now.format("%A, %B %d")
                )
            }
            Intent::ServicesQuestion => "I can help with three things: (1) symptom triage, \
                (2) routing appointment requests, and (3) front-desk questions like billing, \
                records, hours, or location."
                .to_string(),
            Intent::StyleFeedback => "Good feedback — I am deterministic for clinical safety, \
                so my phrasing can sound structured. I can still keep replies shorter and more \
                conversational while staying within triage scope."
                .to_string(),
            Intent::AppointmentRequest => "I can help route appointment requests. If you also \
                have symptoms, tell me your main symptom so I can start triage safely."
                .to_string(),
            Intent::AdminQuestion => "I can help with front-desk support and triage routing. \
                For billing or records, a staff member can assist you directly."
                .to_string(),
            Intent::MedicalSymptom | Intent::Unclear => "I can help with symptom triage, \
                appointments, or admin questions. What do you need help with?"
                .to_string(),
        }
    }
}
