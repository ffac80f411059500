//! Conversational front door for Atmos weather lookups.
//!
//! [`Orchestrator::answer`] takes free text plus a (user, session) pair,
//! extracts a place (or reuses the session's last one), and runs geocode,
//! timezone and forecast in sequence.

pub mod intent;
pub mod orchestrator;
pub mod response;
pub mod session;

pub use intent::{Intent, IntentExtractor, KeywordIntentExtractor};
pub use orchestrator::{retry_policy, Orchestrator, OrchestratorBuilder};
pub use response::compose_response;
pub use session::{KnownLocation, Session, SessionHandle, SessionKey, SessionStore, Turn};

pub use atmos_core::QueryError;
