use std::sync::Arc;

use log::{debug, info, warn};

use crate::dispatch::{AnalysisOutcome, AnalysisSink};
use crate::instructions::InstructionStateMachine;
use crate::models::{AnalysisPayload, Assessment, InstructionStep, MediaKind};
use crate::session::SessionStateMachine;

const CRITICAL_REMINDER: &str =
    "This is a critical emergency. Call 911 immediately if you haven't already.";
const ADVISORY_REMINDER: &str = "Consider calling 911 if professional help is needed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub instructions_replaced: bool,
    pub announced: bool,
}

/// Routes dispatch outcomes into the session and instruction state machines.
///
/// Only completed analyses change anything. Busy, timed-out and failed
/// submissions leave the current guidance in place.
pub struct OutcomeApplier {
    session: Arc<SessionStateMachine>,
    instructions: Arc<InstructionStateMachine>,
}

impl OutcomeApplier {
    pub fn new(session: Arc<SessionStateMachine>, instructions: Arc<InstructionStateMachine>) -> Self {
        Self {
            session,
            instructions,
        }
    }

    /// Returns `None` when there is no active session to apply to.
    pub fn apply(&self, payload: &AnalysisPayload) -> Option<Applied> {
        let was_escalated = self
            .session
            .snapshot()
            .assessment()
            .is_some_and(|assessment| assessment.escalate);

        if let Err(err) = self.session.apply_assessment(payload.assessment.clone()) {
            warn!("analysis result dropped: {err}");
            return None;
        }

        let instructions_replaced = self.instructions.replace_if_changed(payload.instructions.clone());
        let escalation_raised = payload.assessment.escalate && !was_escalated;
        if instructions_replaced {
            info!("received {} new instruction steps", payload.instruction_count);
        }

        let announced = instructions_replaced || escalation_raised;
        if announced {
            let guidance = if payload.voice_guidance.is_empty() {
                compose_guidance(&payload.assessment, self.instructions.current().as_ref())
            } else {
                payload.voice_guidance.clone()
            };
            self.instructions.announce(guidance);
        }

        Some(Applied {
            instructions_replaced,
            announced,
        })
    }
}

impl AnalysisSink for OutcomeApplier {
    fn on_outcome(&self, kind: MediaKind, outcome: &AnalysisOutcome) {
        match outcome {
            AnalysisOutcome::Completed(payload) => {
                self.apply(payload);
            }
            AnalysisOutcome::Busy => debug!("{kind} analysis busy"),
            AnalysisOutcome::TimedOut { after } => warn!(
                "{kind} analysis timed out after {}ms, keeping current guidance",
                after.as_millis()
            ),
            AnalysisOutcome::Failed(err) => {
                warn!("{kind} analysis failed, keeping current guidance: {err}")
            }
        }
    }
}

/// Spoken guidance for an analysis that arrived without any: an escalation
/// reminder, the recommended action, then the current step.
pub fn compose_guidance(assessment: &Assessment, current: Option<&InstructionStep>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if assessment.escalate {
        if assessment.severity.level() >= 4 {
            parts.push(CRITICAL_REMINDER.into());
        } else {
            parts.push(ADVISORY_REMINDER.into());
        }
    }
    if !assessment.recommended_action.is_empty() {
        parts.push(assessment.recommended_action.clone());
    }
    if let Some(step) = current {
        parts.push(format!("Step {}: {}", step.step_number, step.spoken_text));
    }

    parts.join(" ")
}
