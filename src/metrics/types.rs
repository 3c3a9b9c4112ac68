use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{MediaKind, SkipReason};

/// How one capture attempt ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "result", content = "reason", rename_all = "camelCase")]
pub enum CaptureResult {
    Completed,
    Skipped(SkipReason),
    Busy,
    TimedOut,
    Failed,
    /// The outcome arrived after the scheduler was disabled or restarted.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub timestamp: DateTime<Utc>,
    pub kind: MediaKind,
    pub sequence: Option<u64>,
    pub result: CaptureResult,
    pub extract_ms: u64,
    pub dispatch_ms: Option<u64>,
    pub payload_bytes: usize,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

impl CaptureMetrics {
    /// Metrics for an attempt that ended before anything was extracted.
    pub fn skipped(kind: MediaKind, reason: SkipReason) -> Self {
        Self::new(kind, CaptureResult::Skipped(reason))
    }

    pub fn new(kind: MediaKind, result: CaptureResult) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            sequence: None,
            result,
            extract_ms: 0,
            dispatch_ms: None,
            payload_bytes: 0,
            cpu_percent: 0.0,
            memory_mb: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub capture_count: u64,
    pub completed_count: u64,
    pub skip_count: u64,
    pub busy_count: u64,
    pub timeout_count: u64,
    pub failure_count: u64,
    pub discarded_count: u64,
}
