use thiserror::Error;

use crate::models::MediaKind;

/// Failures acquiring or reading a hardware stream.
///
/// Terminal for the affected stream until the user retries the acquisition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device not available: {0}")]
    Unavailable(String),

    #[error("no active {0} stream")]
    NotActive(MediaKind),

    #[error("capture failed: {0}")]
    Capture(String),
}

/// Errors raised by the remote reasoning boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a single submission failed. Always retryable on the next tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no active session")]
    NoActiveSession,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("worker failed: {0}")]
    Worker(String),
}

/// An operation that is not valid in the current lifecycle state.
///
/// Rejected locally; no network call is made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionTransitionError {
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("session start failed: {0}")]
    StartFailed(ServiceError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("speech synthesis unavailable: {0}")]
    Unavailable(String),

    #[error("speech synthesis failed: {0}")]
    Failed(String),
}
