pub mod config;
pub mod escalation;
pub mod front_desk;
pub mod intake;
pub mod intent;
pub mod orchestrator;
pub mod red_flags;
pub mod risk;
pub mod rules;
pub mod service;

pub use config::EngineConfig;
pub use service::{TriageService, TurnOutcome};
