pub mod controller;
pub mod state;

pub use controller::{EndOutcome, SessionStateMachine};
pub use state::{ActiveSession, EndedSession, SessionState};
