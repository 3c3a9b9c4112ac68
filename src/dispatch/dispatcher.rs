use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DispatchError;
use crate::models::{AnalysisPayload, MediaKind, MediaSample};
use crate::service::ReasoningService;
use crate::session::SessionStateMachine;

use super::single_flight::SingleFlight;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Result of one submission. Errors never escape `submit`; they land here.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(AnalysisPayload),
    /// A submission of the same kind was already outstanding. No call made.
    Busy,
    TimedOut { after: Duration },
    Failed(DispatchError),
}

impl AnalysisOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisOutcome::Completed(_) => "completed",
            AnalysisOutcome::Busy => "busy",
            AnalysisOutcome::TimedOut { .. } => "timed_out",
            AnalysisOutcome::Failed(_) => "failed",
        }
    }

    pub fn payload(&self) -> Option<&AnalysisPayload> {
        match self {
            AnalysisOutcome::Completed(payload) => Some(payload),
            _ => None,
        }
    }
}

pub struct AnalysisDispatcher {
    service: Arc<dyn ReasoningService>,
    session: Arc<SessionStateMachine>,
    flights: SingleFlight<MediaKind>,
    frame_timeout: Duration,
    audio_timeout: Duration,
}

impl AnalysisDispatcher {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        session: Arc<SessionStateMachine>,
        frame_timeout: Duration,
        audio_timeout: Duration,
    ) -> Self {
        Self {
            service,
            session,
            flights: SingleFlight::new(),
            frame_timeout,
            audio_timeout,
        }
    }

    pub fn timeout_for(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Video => self.frame_timeout,
            MediaKind::Audio => self.audio_timeout,
        }
    }

    pub fn is_in_flight(&self, kind: MediaKind) -> bool {
        self.flights.is_in_flight(&kind)
    }

    pub async fn submit(&self, sample: MediaSample) -> AnalysisOutcome {
        let kind = sample.kind();
        let Some(_flight) = self.flights.try_acquire(kind) else {
            log_debug!("{kind} #{} dropped: previous submission outstanding", sample.sequence());
            return AnalysisOutcome::Busy;
        };

        let Some(session_id) = self.session.session_id() else {
            log_warn!("{kind} #{} not sent: no active session", sample.sequence());
            return AnalysisOutcome::Failed(DispatchError::NoActiveSession);
        };
        self.session.mark_analyzing();

        let timeout = self.timeout_for(kind);
        let started = Instant::now();
        let request = async {
            match &sample {
                MediaSample::Frame(frame) => self.service.analyze_frame(&session_id, frame).await,
                MediaSample::Clip(clip) => self.service.analyze_audio(&session_id, clip).await,
            }
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(payload)) => {
                log_info!(
                    "{kind} #{} analyzed in {}ms: {} (severity {}, {} steps)",
                    sample.sequence(),
                    started.elapsed().as_millis(),
                    payload.assessment.emergency_type.as_str(),
                    payload.assessment.severity.level(),
                    payload.instruction_count
                );
                AnalysisOutcome::Completed(payload)
            }
            Ok(Err(err)) => {
                log_warn!("{kind} #{} analysis failed: {err}", sample.sequence());
                AnalysisOutcome::Failed(err.into())
            }
            Err(_) => {
                log_warn!(
                    "{kind} #{} analysis timed out after {}ms",
                    sample.sequence(),
                    timeout.as_millis()
                );
                AnalysisOutcome::TimedOut { after: timeout }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::models::{SessionStatus, StartSessionRequest};
    use crate::testing::{sample_clip, sample_frame, MockReasoningService};

    async fn started(service: &Arc<MockReasoningService>) -> AnalysisDispatcher {
        let session = Arc::new(SessionStateMachine::new(service.clone()));
        session.start(StartSessionRequest::default()).await.unwrap();
        AnalysisDispatcher::new(
            service.clone(),
            session,
            Duration::from_secs(30),
            Duration::from_secs(15),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_of_same_kind_is_busy() {
        let service = Arc::new(MockReasoningService::new());
        service.set_delay(MediaKind::Video, Duration::from_secs(2));
        let dispatcher = started(&service).await;

        let (first, second) = tokio::join!(
            dispatcher.submit(MediaSample::Frame(sample_frame(1))),
            dispatcher.submit(MediaSample::Frame(sample_frame(2))),
        );

        assert!(matches!(first, AnalysisOutcome::Completed(_)));
        assert_eq!(second, AnalysisOutcome::Busy);
        assert_eq!(service.calls("frame"), 1);
        assert!(!dispatcher.is_in_flight(MediaKind::Video));
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_do_not_block_each_other() {
        let service = Arc::new(MockReasoningService::new());
        service.set_delay(MediaKind::Video, Duration::from_secs(2));
        let dispatcher = started(&service).await;

        let (video, audio) = tokio::join!(
            dispatcher.submit(MediaSample::Frame(sample_frame(1))),
            dispatcher.submit(MediaSample::Clip(sample_clip(1))),
        );
        assert_eq!(video.label(), "completed");
        assert_eq!(audio.label(), "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinct_from_failure() {
        let service = Arc::new(MockReasoningService::new());
        service.set_delay(MediaKind::Audio, Duration::from_secs(20));
        let dispatcher = started(&service).await;

        let outcome = dispatcher.submit(MediaSample::Clip(sample_clip(1))).await;
        assert_eq!(
            outcome,
            AnalysisOutcome::TimedOut {
                after: Duration::from_secs(15)
            }
        );

        service.set_delay(MediaKind::Audio, Duration::ZERO);
        service.fail_analysis(ServiceError::Status {
            code: 500,
            message: "Internal error".into(),
        });
        let outcome = dispatcher.submit(MediaSample::Clip(sample_clip(2))).await;
        assert!(matches!(
            outcome,
            AnalysisOutcome::Failed(DispatchError::Service(ServiceError::Status { code: 500, .. }))
        ));
    }

    #[tokio::test]
    async fn no_session_fails_without_a_call() {
        let service = Arc::new(MockReasoningService::new());
        let session = Arc::new(SessionStateMachine::new(service.clone()));
        let dispatcher = AnalysisDispatcher::new(
            service.clone(),
            session,
            Duration::from_secs(30),
            Duration::from_secs(15),
        );

        let outcome = dispatcher.submit(MediaSample::Frame(sample_frame(1))).await;
        assert_eq!(outcome, AnalysisOutcome::Failed(DispatchError::NoActiveSession));
        assert_eq!(service.calls("frame"), 0);
    }

    #[tokio::test]
    async fn first_submission_marks_session_analyzing() {
        let service = Arc::new(MockReasoningService::new());
        service.fail_analysis(ServiceError::Transport("offline".into()));
        let session = Arc::new(SessionStateMachine::new(service.clone()));
        session.start(StartSessionRequest::default()).await.unwrap();
        let dispatcher = AnalysisDispatcher::new(
            service.clone(),
            session.clone(),
            Duration::from_secs(30),
            Duration::from_secs(15),
        );

        dispatcher.submit(MediaSample::Frame(sample_frame(1))).await;
        match session.snapshot() {
            crate::session::SessionState::Active(active) => {
                assert_eq!(active.status, SessionStatus::Analyzing)
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
