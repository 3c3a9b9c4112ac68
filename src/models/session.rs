use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an engagement as understood by both client and service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Analyzing,
    Active,
    Monitoring,
    Resolved,
    Escalated,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Active => "active",
            SessionStatus::Monitoring => "monitoring",
            SessionStatus::Resolved => "resolved",
            SessionStatus::Escalated => "escalated",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Resolved | SessionStatus::Escalated | SessionStatus::Cancelled
        )
    }
}

/// Result of a successful session-start exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTicket {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub total_steps: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
}

impl StartSessionRequest {
    /// Blank fields are sent as absent.
    pub fn new(user_notes: Option<String>, location_data: Option<String>) -> Self {
        Self {
            user_notes: non_blank(user_notes),
            location_data: non_blank(location_data),
            device_info: Some(format!(
                "{} {} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndSessionRequest {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub emergency_services_called: bool,
}

impl EndSessionRequest {
    pub fn new(reason: impl Into<String>, emergency_services_called: bool) -> Self {
        Self {
            reason: reason.into(),
            notes: None,
            emergency_services_called,
        }
    }

    /// Terminal status implied by this request.
    pub fn terminal_status(&self) -> SessionStatus {
        if self.emergency_services_called {
            SessionStatus::Escalated
        } else if self.reason.to_lowercase().contains("cancel") {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Resolved
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
