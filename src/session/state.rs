use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Assessment, SessionStatus};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// Server-visible sub-status while the engagement is live.
    pub status: SessionStatus,
    pub assessment: Option<Assessment>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndedSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub reason: String,
    pub ended_at: DateTime<Utc>,
    /// Last assessment, kept so the summary screen can still show it.
    pub assessment: Option<Assessment>,
}

/// Lifecycle of one engagement.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    Idle { last_error: Option<String> },
    Starting,
    Active(ActiveSession),
    Ended(EndedSession),
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle { last_error: None }
    }
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle { .. } => "idle",
            SessionState::Starting => "starting",
            SessionState::Active(_) => "active",
            SessionState::Ended(_) => "ended",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionState::Active(active) => Some(&active.session_id),
            _ => None,
        }
    }

    pub fn assessment(&self) -> Option<&Assessment> {
        match self {
            SessionState::Active(active) => active.assessment.as_ref(),
            SessionState::Ended(ended) => ended.assessment.as_ref(),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active(_))
    }
}

/// Sub-status an active session takes after an assessment lands.
pub fn status_for(assessment: &Assessment) -> SessionStatus {
    if assessment.escalate {
        SessionStatus::Escalated
    } else if assessment.severity.level() <= 2 {
        SessionStatus::Monitoring
    } else {
        SessionStatus::Active
    }
}
