mod assessment;
mod instruction;
mod media;
mod session;

pub use assessment::{Assessment, EmergencyType, Severity};
pub use instruction::{InstructionList, InstructionStep};
pub use media::{
    AudioClip, CaptureOutcome, FacingMode, MediaKind, MediaSample, RawFrame, SkipReason,
    StreamOptions, VideoFrame,
};
pub use session::{
    EndSessionRequest, SessionStatus, SessionTicket, StartSessionRequest,
};

/// Everything one successful analysis returns.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub assessment: Assessment,
    pub instructions: InstructionList,
    /// Number of instructions carried; zero is a valid, successful result.
    pub instruction_count: usize,
    pub voice_guidance: String,
}

impl AnalysisPayload {
    pub fn new(assessment: Assessment, instructions: InstructionList, voice_guidance: String) -> Self {
        Self {
            instruction_count: instructions.len(),
            assessment,
            instructions,
            voice_guidance,
        }
    }
}
