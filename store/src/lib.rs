pub mod crypto;
pub mod store;

pub use crypto::Envelope;
pub use store::{TicketWrite, TranscriptWrite, TriageStore};
