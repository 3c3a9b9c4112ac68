pub mod dispatcher;
pub mod single_flight;

pub use dispatcher::{AnalysisDispatcher, AnalysisOutcome};
pub use single_flight::{FlightGuard, SingleFlight};

use crate::models::MediaKind;

/// Receives dispatch outcomes that are still current.
pub trait AnalysisSink: Send + Sync {
    fn on_outcome(&self, kind: MediaKind, outcome: &AnalysisOutcome);
}
