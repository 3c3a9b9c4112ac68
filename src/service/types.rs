//! JSON bodies exchanged with the reasoning service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::models::{
    AnalysisPayload, Assessment, AudioClip, EmergencyType, InstructionList, InstructionStep,
    VideoFrame,
};

const MIN_FRAME_DATA_LEN: usize = 100;
const MAX_FRAME_DIMENSION: u32 = 4096;

/// Every response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// `Ok(None)` for a successful envelope without data.
    pub fn into_result(self) -> Result<Option<T>, ServiceError> {
        if !self.success {
            return Err(ServiceError::Rejected(self.message));
        }
        Ok(self.data)
    }

    pub fn into_data(self) -> Result<T, ServiceError> {
        let message = self.message.clone();
        self.into_result()?
            .ok_or_else(|| ServiceError::Decode(format!("response carried no data: {message}")))
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeFrameBody<'a> {
    pub session_id: &'a str,
    pub frame_data: &'a str,
    pub sequence_number: u64,
    pub width: u32,
    pub height: u32,
    pub format: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl<'a> AnalyzeFrameBody<'a> {
    pub fn new(session_id: &'a str, frame: &'a VideoFrame) -> Result<Self, ServiceError> {
        if frame.data_base64.len() < MIN_FRAME_DATA_LEN {
            return Err(ServiceError::InvalidRequest(format!(
                "frame data too small ({} bytes)",
                frame.data_base64.len()
            )));
        }
        for dimension in [frame.width, frame.height] {
            if !(1..=MAX_FRAME_DIMENSION).contains(&dimension) {
                return Err(ServiceError::InvalidRequest(format!(
                    "frame dimensions {}x{} outside 1..={MAX_FRAME_DIMENSION}",
                    frame.width, frame.height
                )));
            }
        }

        Ok(Self {
            session_id,
            frame_data: &frame.data_base64,
            sequence_number: frame.sequence,
            width: frame.width,
            height: frame.height,
            format: frame.format,
            timestamp: frame.captured_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessAudioBody<'a> {
    pub session_id: &'a str,
    pub audio_data: &'a str,
    pub sequence_number: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
    pub format: &'a str,
}

impl<'a> ProcessAudioBody<'a> {
    pub fn new(session_id: &'a str, clip: &'a AudioClip) -> Result<Self, ServiceError> {
        if !(8_000..=96_000).contains(&clip.sample_rate) {
            return Err(ServiceError::InvalidRequest(format!(
                "sample rate {} outside 8000..=96000",
                clip.sample_rate
            )));
        }
        if !(1..=8).contains(&clip.channels) {
            return Err(ServiceError::InvalidRequest(format!(
                "channel count {} outside 1..=8",
                clip.channels
            )));
        }
        if !(1..=60_000).contains(&clip.duration_ms) {
            return Err(ServiceError::InvalidRequest(format!(
                "clip duration {} ms outside 1..=60000",
                clip.duration_ms
            )));
        }

        Ok(Self {
            session_id,
            audio_data: &clip.data_base64,
            sequence_number: clip.sequence,
            sample_rate: clip.sample_rate,
            channels: clip.channels,
            duration_ms: clip.duration_ms,
            format: clip.format,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AdvanceBody<'a> {
    pub session_id: &'a str,
    pub current_step: u32,
}

#[derive(Debug, Serialize)]
pub struct EndBody<'a> {
    pub session_id: &'a str,
    pub reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<&'a str>,
    pub emergency_services_called: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireInstruction {
    pub step_number: u32,
    pub instruction_text: String,
    #[serde(default)]
    pub voice_text: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub visual_cue: Option<String>,
}

impl From<WireInstruction> for InstructionStep {
    fn from(wire: WireInstruction) -> Self {
        let spoken_text = if wire.voice_text.trim().is_empty() {
            wire.instruction_text.clone()
        } else {
            wire.voice_text
        };

        InstructionStep {
            step_number: wire.step_number,
            display_text: wire.instruction_text,
            spoken_text,
            duration_secs: wire.duration_seconds,
            warning: wire.warning,
            visual_cue: wire.visual_cue,
            requires_confirmation: wire.requires_confirmation,
        }
    }
}

fn default_escalate() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisData {
    pub emergency_type: EmergencyType,
    #[serde(default)]
    pub severity: Option<i64>,
    #[serde(default)]
    pub confidence_score: f32,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub recommended_action: String,
    #[serde(default = "default_escalate")]
    pub call_emergency_services: bool,
    #[serde(default)]
    pub instructions: Vec<WireInstruction>,
    #[serde(default)]
    pub voice_guidance: String,
}

impl From<AnalysisData> for AnalysisPayload {
    fn from(data: AnalysisData) -> Self {
        let severity = data.severity.and_then(|level| u8::try_from(level).ok());
        let assessment = Assessment::new(
            data.emergency_type,
            severity,
            data.confidence_score,
            data.observations,
            data.recommended_action,
            data.call_emergency_services,
        );
        let instructions =
            InstructionList::new(data.instructions.into_iter().map(Into::into).collect());

        AnalysisPayload::new(assessment, instructions, data.voice_guidance.trim().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstructionData {
    pub current_step: u32,
    pub total_steps: u32,
    pub instruction: WireInstruction,
    #[serde(default)]
    pub next_instruction: Option<WireInstruction>,
    #[serde(default)]
    pub voice_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthData {
    pub status: String,
    #[serde(default)]
    pub gemini_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_without_instructions_is_valid() {
        let json = r#"{
            "success": true,
            "message": "Frame analyzed",
            "data": {
                "session_id": "550e8400-e29b-41d4-a716-446655440000",
                "emergency_type": "burn",
                "severity": 2,
                "confidence_score": 0.7,
                "observations": ["redness on forearm", ""],
                "recommended_action": "Cool the burn under running water",
                "call_emergency_services": false,
                "voice_guidance": "Cool the burn."
            }
        }"#;

        let envelope: Envelope<AnalysisData> = serde_json::from_str(json).unwrap();
        let payload: AnalysisPayload = envelope.into_data().unwrap().into();

        assert_eq!(payload.instruction_count, 0);
        assert!(payload.instructions.is_empty());
        assert_eq!(payload.assessment.emergency_type, EmergencyType::Burn);
        assert_eq!(payload.assessment.observations, vec!["redness on forearm"]);
        assert!(!payload.assessment.escalate);
    }

    #[test]
    fn missing_severity_is_estimated_and_escalation_defaults_on() {
        let json = r#"{
            "emergency_type": "cardiac_arrest",
            "recommended_action": "Start CPR",
            "instructions": [
                {"step_number": 2, "instruction_text": "Push hard", "voice_text": ""},
                {"step_number": 1, "instruction_text": "Call for help", "voice_text": "Call for help now"}
            ]
        }"#;

        let payload: AnalysisPayload = serde_json::from_str::<AnalysisData>(json).unwrap().into();
        assert_eq!(payload.assessment.severity.level(), 5);
        assert!(payload.assessment.escalate);
        assert_eq!(payload.instruction_count, 2);

        let first = payload.instructions.step(1).unwrap();
        assert_eq!(first.spoken_text, "Call for help now");
        let second = payload.instructions.step(2).unwrap();
        assert_eq!(second.spoken_text, "Push hard");
    }

    #[test]
    fn failed_envelope_is_rejected() {
        let envelope: Envelope<HealthData> =
            serde_json::from_str(r#"{"success": false, "message": "Session not found", "data": null}"#)
                .unwrap();
        assert_eq!(
            envelope.into_result().unwrap_err(),
            ServiceError::Rejected("Session not found".into())
        );
    }

    #[test]
    fn frame_body_validates_dimensions() {
        let frame = VideoFrame {
            sequence: 1,
            width: 5000,
            height: 10,
            format: "jpeg",
            data_base64: "A".repeat(200),
            phash: None,
            captured_at: Utc::now(),
        };
        assert!(matches!(
            AnalyzeFrameBody::new("s", &frame),
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
