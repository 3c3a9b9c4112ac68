use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera facing mode. `User` is the selfie camera, `Environment` the rear one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

/// Options for a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOptions {
    Video { facing: FacingMode },
    Audio { sample_rate: u32 },
}

impl StreamOptions {
    pub fn kind(&self) -> MediaKind {
        match self {
            StreamOptions::Video { .. } => MediaKind::Video,
            StreamOptions::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// Uncompressed RGBA frame as delivered by a video track.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A still frame ready for submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    #[serde(skip)]
    pub data_base64: String,
    pub phash: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// A push-to-talk recording ready for submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioClip {
    pub sequence: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
    pub format: &'static str,
    #[serde(skip)]
    pub data_base64: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MediaSample {
    Frame(VideoFrame),
    Clip(AudioClip),
}

impl MediaSample {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaSample::Frame(_) => MediaKind::Video,
            MediaSample::Clip(_) => MediaKind::Audio,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            MediaSample::Frame(frame) => frame.sequence,
            MediaSample::Clip(clip) => clip.sequence,
        }
    }
}

/// Why a capture attempt produced no sample. Not an error.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The prior capture for this kind has not finished.
    InFlight,
    /// The scheduler is disabled.
    Disabled,
    /// No live stream of this kind.
    StreamInactive,
    /// The video track has not decoded enough frames yet.
    NotReady,
    /// The frame is perceptually identical to the last submitted one.
    Unchanged,
    /// Push-to-talk was released before enough audio was recorded.
    TooShort,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InFlight => "in_flight",
            SkipReason::Disabled => "disabled",
            SkipReason::StreamInactive => "stream_inactive",
            SkipReason::NotReady => "not_ready",
            SkipReason::Unchanged => "unchanged",
            SkipReason::TooShort => "too_short",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Captured(MediaSample),
    Skipped(SkipReason),
}

impl CaptureOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CaptureOutcome::Skipped(_))
    }
}
