pub mod http;
pub mod types;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ServiceError;
use crate::models::{
    AnalysisPayload, AudioClip, EndSessionRequest, SessionTicket, StartSessionRequest, VideoFrame,
};

pub use http::HttpReasoningService;

/// Result of the remote advance exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepProgress {
    Next {
        current_step: u32,
        total_steps: u32,
        voice_text: String,
    },
    Complete,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub status: String,
    pub gemini_connected: bool,
}

/// The remote reasoning boundary. Opaque request/response; every call may
/// fail independently and the pipeline never depends on one succeeding.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn start_session(&self, request: &StartSessionRequest)
        -> Result<SessionTicket, ServiceError>;

    async fn analyze_frame(
        &self,
        session_id: &str,
        frame: &VideoFrame,
    ) -> Result<AnalysisPayload, ServiceError>;

    async fn analyze_audio(
        &self,
        session_id: &str,
        clip: &AudioClip,
    ) -> Result<AnalysisPayload, ServiceError>;

    /// Tell the service the user finished `current_step`.
    async fn advance_step(
        &self,
        session_id: &str,
        current_step: u32,
    ) -> Result<StepProgress, ServiceError>;

    async fn end_session(
        &self,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<(), ServiceError>;

    async fn health(&self) -> Result<ServiceHealth, ServiceError>;

    fn name(&self) -> &str;
}
