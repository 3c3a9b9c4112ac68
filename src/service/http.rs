//! Reasoning service over HTTP/JSON.
//!
//! Requests go through a blocking `ureq` agent on the tokio blocking pool so
//! the async callers can still put their own timeouts around them.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{
    AdvanceBody, AnalysisData, AnalyzeFrameBody, EndBody, Envelope, HealthData, InstructionData,
    ProcessAudioBody,
};
use super::{ReasoningService, ServiceHealth, StepProgress};
use crate::error::ServiceError;
use crate::models::{
    AnalysisPayload, AudioClip, EndSessionRequest, SessionTicket, StartSessionRequest, VideoFrame,
};

const API_PREFIX: &str = "/api/v1";
const MAX_ERROR_BODY: usize = 300;

pub struct HttpReasoningService {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpReasoningService {
    /// `timeout` bounds a single HTTP exchange at the transport level. It
    /// should exceed the longest dispatch timeout so that the dispatcher,
    /// not the transport, decides when a request has timed out.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        log::info!("HttpReasoningService: endpoint {base_url}");
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    async fn post<B, T>(&self, url: String, body: &B) -> Result<Envelope<T>, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let body = serde_json::to_value(body)
            .map_err(|err| ServiceError::InvalidRequest(err.to_string()))?;
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            let response = agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_json(body)
                .map_err(map_ureq_error)?;
            response
                .into_json::<Envelope<T>>()
                .map_err(|err| ServiceError::Decode(err.to_string()))
        })
        .await
        .map_err(|err| ServiceError::Transport(format!("request worker failed: {err}")))?
    }

    async fn get<T>(&self, url: String) -> Result<Envelope<T>, ServiceError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            let response = agent.get(&url).call().map_err(map_ureq_error)?;
            response
                .into_json::<Envelope<T>>()
                .map_err(|err| ServiceError::Decode(err.to_string()))
        })
        .await
        .map_err(|err| ServiceError::Transport(format!("request worker failed: {err}")))?
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<SessionTicket, ServiceError> {
        self.post::<_, SessionTicket>(self.api_url("/session/start"), request)
            .await?
            .into_data()
    }

    async fn analyze_frame(
        &self,
        session_id: &str,
        frame: &VideoFrame,
    ) -> Result<AnalysisPayload, ServiceError> {
        let body = AnalyzeFrameBody::new(session_id, frame)?;
        let data = self
            .post::<_, AnalysisData>(self.api_url("/emergency/analyze"), &body)
            .await?
            .into_data()?;
        Ok(data.into())
    }

    async fn analyze_audio(
        &self,
        session_id: &str,
        clip: &AudioClip,
    ) -> Result<AnalysisPayload, ServiceError> {
        let body = ProcessAudioBody::new(session_id, clip)?;
        let data = self
            .post::<_, AnalysisData>(self.api_url("/emergency/audio"), &body)
            .await?
            .into_data()?;
        Ok(data.into())
    }

    async fn advance_step(
        &self,
        session_id: &str,
        current_step: u32,
    ) -> Result<StepProgress, ServiceError> {
        let body = AdvanceBody {
            session_id,
            current_step,
        };
        let data = self
            .post::<_, InstructionData>(self.api_url("/emergency/advance"), &body)
            .await?
            .into_result()?;

        Ok(match data {
            Some(data) => StepProgress::Next {
                current_step: data.current_step,
                total_steps: data.total_steps,
                voice_text: data.voice_text,
            },
            None => StepProgress::Complete,
        })
    }

    async fn end_session(
        &self,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<(), ServiceError> {
        let body = EndBody {
            session_id,
            reason: &request.reason,
            notes: request.notes.as_deref(),
            emergency_services_called: request.emergency_services_called,
        };
        self.post::<_, serde_json::Value>(self.api_url(&format!("/session/{session_id}/end")), &body)
            .await?
            .into_result()
            .map(|_| ())
    }

    async fn health(&self) -> Result<ServiceHealth, ServiceError> {
        let data = self
            .get::<HealthData>(format!("{}/health", self.base_url))
            .await?
            .into_data()?;
        Ok(ServiceHealth {
            status: data.status,
            gemini_connected: data.gemini_connected,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn map_ureq_error(err: ureq::Error) -> ServiceError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            ServiceError::Status {
                code,
                message: error_detail(&body),
            }
        }
        ureq::Error::Transport(transport) => ServiceError::Transport(transport.to_string()),
    }
}

/// Pull a readable message out of an error body (`detail` from the framework,
/// `message` from the envelope), falling back to the raw text.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
