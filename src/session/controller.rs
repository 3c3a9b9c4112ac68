use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ServiceError, SessionTransitionError};
use crate::models::{Assessment, EndSessionRequest, SessionStatus, StartSessionRequest};
use crate::service::ReasoningService;

use super::state::{status_for, ActiveSession, EndedSession, SessionState};

/// What `end` did.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// The session moved to ended. `remote_error` is set when the service
    /// could not be told; the local transition stands regardless.
    Ended {
        session: EndedSession,
        remote_error: Option<ServiceError>,
    },
    AlreadyEnded,
}

/// Owns the session lifecycle. All transitions happen under one lock and are
/// published to subscribers after the lock is released.
pub struct SessionStateMachine {
    service: Arc<dyn ReasoningService>,
    state: Mutex<SessionState>,
    tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self {
            service,
            state: Mutex::new(SessionState::default()),
            tx,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id().map(str::to_string)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_active()
    }

    pub async fn start(
        &self,
        request: StartSessionRequest,
    ) -> Result<ActiveSession, SessionTransitionError> {
        self.transition(|state| match state {
            SessionState::Idle { .. } | SessionState::Ended(_) => {
                *state = SessionState::Starting;
                Ok(())
            }
            other => Err(invalid("start", other)),
        })?;

        match self.service.start_session(&request).await {
            Ok(ticket) => {
                let active = ActiveSession {
                    session_id: ticket.session_id,
                    started_at: ticket.started_at,
                    status: ticket.status,
                    assessment: None,
                };
                info!("session {} started ({})", active.session_id, active.status.as_str());
                self.replace(SessionState::Active(active.clone()));
                Ok(active)
            }
            Err(err) => {
                warn!("session start failed: {err}");
                self.replace(SessionState::Idle {
                    last_error: Some(err.to_string()),
                });
                Err(SessionTransitionError::StartFailed(err))
            }
        }
    }

    /// Replace the current assessment wholesale and derive the sub-status.
    pub fn apply_assessment(
        &self,
        assessment: Assessment,
    ) -> Result<SessionStatus, SessionTransitionError> {
        self.transition(|state| match state {
            SessionState::Active(active) => {
                let status = status_for(&assessment);
                if status != active.status {
                    info!(
                        "session {} status {} -> {}",
                        active.session_id,
                        active.status.as_str(),
                        status.as_str()
                    );
                }
                active.status = status;
                active.assessment = Some(assessment);
                Ok(status)
            }
            other => Err(invalid("apply an assessment", other)),
        })
    }

    /// Flag the first submission of a session. Returns whether anything changed.
    pub fn mark_analyzing(&self) -> bool {
        self.transition(|state| match state {
            SessionState::Active(active)
                if active.assessment.is_none() && active.status != SessionStatus::Analyzing =>
            {
                active.status = SessionStatus::Analyzing;
                Ok(())
            }
            _ => Err(()),
        })
        .is_ok()
    }

    /// End the session locally, then tell the service.
    ///
    /// A second call after the session ended is a no-op and makes no network
    /// call.
    pub async fn end(
        &self,
        request: EndSessionRequest,
    ) -> Result<EndOutcome, SessionTransitionError> {
        let ended = {
            let mut state = self.state.lock();
            let ended = match &*state {
                SessionState::Active(active) => EndedSession {
                    session_id: active.session_id.clone(),
                    status: request.terminal_status(),
                    reason: request.reason.clone(),
                    ended_at: Utc::now(),
                    assessment: active.assessment.clone(),
                },
                SessionState::Ended(_) => return Ok(EndOutcome::AlreadyEnded),
                other => return Err(invalid("end", other)),
            };
            *state = SessionState::Ended(ended.clone());
            self.tx.send_replace(state.clone());
            ended
        };
        info!(
            "session {} ended ({}): {}",
            ended.session_id,
            ended.status.as_str(),
            ended.reason
        );

        let remote_error = match self.service.end_session(&ended.session_id, &request).await {
            Ok(()) => None,
            Err(err) => {
                warn!("service was not notified of session end: {err}");
                Some(err)
            }
        };

        Ok(EndOutcome::Ended {
            session: ended,
            remote_error,
        })
    }

    fn transition<T, E>(&self, apply: impl FnOnce(&mut SessionState) -> Result<T, E>) -> Result<T, E> {
        let mut state = self.state.lock();
        let result = apply(&mut state)?;
        self.tx.send_replace(state.clone());
        Ok(result)
    }

    fn replace(&self, next: SessionState) {
        let mut state = self.state.lock();
        *state = next;
        self.tx.send_replace(state.clone());
    }
}

fn invalid(operation: &'static str, state: &SessionState) -> SessionTransitionError {
    SessionTransitionError::InvalidState {
        operation,
        state: state.name(),
    }
}
