use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::error::DeviceError;
use crate::models::{FacingMode, MediaKind, RawFrame, StreamOptions};

use super::meter::AudioLevels;
use super::traits::{AudioTrack, MediaDevices, VideoTrack};

/// Observable state of one stream kind.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub kind: MediaKind,
    pub active: bool,
    pub facing: Option<FacingMode>,
    pub label: Option<String>,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<DeviceError>,
}

impl DeviceStatus {
    fn inactive(kind: MediaKind) -> Self {
        Self {
            kind,
            active: false,
            facing: None,
            label: None,
            last_error: None,
        }
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<DeviceError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

pub enum FrameGrab {
    Ready(RawFrame),
    NotReady { frames_decoded: u64 },
}

/// PCM collected between `begin_recording` and `finish_recording`.
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

struct VideoSlot {
    track: Option<Arc<dyn VideoTrack>>,
    facing: FacingMode,
    last_error: Option<DeviceError>,
}

struct AudioSlot {
    track: Option<Arc<dyn AudioTrack>>,
    sample_rate: u32,
    last_error: Option<DeviceError>,
    recording: Option<Vec<f32>>,
}

/// Sole owner of the camera and microphone streams.
///
/// Tracks never leave this type; callers go through `grab_frame`, `meter`
/// and the recording methods. Acquisitions of one kind are serialized so a
/// stale track is always stopped before its replacement is requested.
pub struct DeviceStreamManager {
    devices: Arc<dyn MediaDevices>,
    min_ready_frames: u64,
    video: Mutex<VideoSlot>,
    audio: Mutex<AudioSlot>,
    video_gate: AsyncMutex<()>,
    audio_gate: AsyncMutex<()>,
    video_tx: watch::Sender<DeviceStatus>,
    audio_tx: watch::Sender<DeviceStatus>,
    levels_tx: watch::Sender<AudioLevels>,
}

impl DeviceStreamManager {
    pub fn new(devices: Arc<dyn MediaDevices>, min_ready_frames: u64) -> Self {
        let (video_tx, _) = watch::channel(DeviceStatus::inactive(MediaKind::Video));
        let (audio_tx, _) = watch::channel(DeviceStatus::inactive(MediaKind::Audio));
        let (levels_tx, _) = watch::channel(AudioLevels::default());

        Self {
            devices,
            min_ready_frames,
            video: Mutex::new(VideoSlot {
                track: None,
                facing: FacingMode::default(),
                last_error: None,
            }),
            audio: Mutex::new(AudioSlot {
                track: None,
                sample_rate: 16_000,
                last_error: None,
                recording: None,
            }),
            video_gate: AsyncMutex::new(()),
            audio_gate: AsyncMutex::new(()),
            video_tx,
            audio_tx,
            levels_tx,
        }
    }

    pub async fn acquire(&self, options: StreamOptions) -> Result<DeviceStatus, DeviceError> {
        match options {
            StreamOptions::Video { facing } => {
                let _gate = self.video_gate.lock().await;
                self.acquire_video(facing).await
            }
            StreamOptions::Audio { sample_rate } => {
                let _gate = self.audio_gate.lock().await;
                self.acquire_audio(sample_rate).await
            }
        }
    }

    /// Stop the stream of `kind`. The retained error, if any, is kept.
    pub fn release(&self, kind: MediaKind) {
        match kind {
            MediaKind::Video => self.release_video(),
            MediaKind::Audio => self.release_audio(),
        }
    }

    pub fn release_all(&self) {
        self.release_video();
        self.release_audio();
    }

    /// Release the camera and reacquire it facing the other way.
    ///
    /// Fails closed: if the new camera cannot be opened the stream stays
    /// inactive rather than falling back to the old one.
    pub async fn switch_facing(&self) -> Result<DeviceStatus, DeviceError> {
        let _gate = self.video_gate.lock().await;
        let next = self.video.lock().facing.toggled();
        info!("switching camera to {next:?}");
        self.acquire_video(next).await
    }

    pub fn clear_error(&self, kind: MediaKind) {
        match kind {
            MediaKind::Video => self.video.lock().last_error = None,
            MediaKind::Audio => self.audio.lock().last_error = None,
        }
        self.publish(kind);
    }

    pub fn status(&self, kind: MediaKind) -> DeviceStatus {
        match kind {
            MediaKind::Video => self.video_tx.borrow().clone(),
            MediaKind::Audio => self.audio_tx.borrow().clone(),
        }
    }

    pub fn subscribe(&self, kind: MediaKind) -> watch::Receiver<DeviceStatus> {
        match kind {
            MediaKind::Video => self.video_tx.subscribe(),
            MediaKind::Audio => self.audio_tx.subscribe(),
        }
    }

    pub fn subscribe_levels(&self) -> watch::Receiver<AudioLevels> {
        self.levels_tx.subscribe()
    }

    pub fn is_active(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video.lock().track.is_some(),
            MediaKind::Audio => self.audio.lock().track.is_some(),
        }
    }

    pub fn grab_frame(&self) -> Result<FrameGrab, DeviceError> {
        let track = self
            .video
            .lock()
            .track
            .clone()
            .ok_or(DeviceError::NotActive(MediaKind::Video))?;

        let frames_decoded = track.frames_decoded();
        if frames_decoded < self.min_ready_frames {
            return Ok(FrameGrab::NotReady { frames_decoded });
        }

        track.grab_frame().map(FrameGrab::Ready)
    }

    /// Drain pending microphone samples, publish their levels and append them
    /// to the push-to-talk buffer when recording.
    pub fn meter(&self) -> AudioLevels {
        let levels = {
            let mut slot = self.audio.lock();
            let Some(track) = slot.track.clone() else {
                return AudioLevels::default();
            };
            let samples = track.take_samples();
            let levels = AudioLevels::measure(&samples);
            if let Some(buffer) = slot.recording.as_mut() {
                buffer.extend_from_slice(&samples);
            }
            levels
        };

        self.levels_tx.send_replace(levels);
        levels
    }

    pub fn begin_recording(&self) -> Result<(), DeviceError> {
        let mut slot = self.audio.lock();
        let Some(track) = slot.track.clone() else {
            return Err(DeviceError::NotActive(MediaKind::Audio));
        };
        // Anything buffered before the button press is not part of the clip.
        let _ = track.take_samples();
        slot.recording = Some(Vec::new());
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.audio.lock().recording.is_some()
    }

    pub fn finish_recording(&self) -> Result<RecordedAudio, DeviceError> {
        self.meter();

        let mut slot = self.audio.lock();
        let samples = slot.recording.take().unwrap_or_default();
        if slot.track.is_none() {
            return Err(DeviceError::NotActive(MediaKind::Audio));
        }
        Ok(RecordedAudio {
            samples,
            sample_rate: slot.sample_rate,
        })
    }

    async fn acquire_video(&self, facing: FacingMode) -> Result<DeviceStatus, DeviceError> {
        self.release_video();
        self.video.lock().facing = facing;

        match self.devices.open_video(facing).await {
            Ok(track) => {
                info!("camera acquired: {} ({facing:?})", track.label());
                {
                    let mut slot = self.video.lock();
                    slot.track = Some(track);
                    slot.last_error = None;
                }
                Ok(self.publish(MediaKind::Video))
            }
            Err(err) => {
                warn!("camera acquisition failed: {err}");
                self.video.lock().last_error = Some(err.clone());
                self.publish(MediaKind::Video);
                Err(err)
            }
        }
    }

    async fn acquire_audio(&self, sample_rate: u32) -> Result<DeviceStatus, DeviceError> {
        self.release_audio();

        match self.devices.open_audio(sample_rate).await {
            Ok(track) => {
                info!("microphone acquired: {} @ {} Hz", track.label(), track.sample_rate());
                {
                    let mut slot = self.audio.lock();
                    slot.sample_rate = track.sample_rate();
                    slot.track = Some(track);
                    slot.last_error = None;
                }
                Ok(self.publish(MediaKind::Audio))
            }
            Err(err) => {
                warn!("microphone acquisition failed: {err}");
                self.audio.lock().last_error = Some(err.clone());
                self.publish(MediaKind::Audio);
                Err(err)
            }
        }
    }

    fn release_video(&self) {
        let previous = self.video.lock().track.take();
        if let Some(track) = previous {
            track.stop();
            info!("camera released: {}", track.label());
            self.publish(MediaKind::Video);
        }
    }

    fn release_audio(&self) {
        let previous = {
            let mut slot = self.audio.lock();
            slot.recording = None;
            slot.track.take()
        };
        if let Some(track) = previous {
            track.stop();
            info!("microphone released: {}", track.label());
            self.levels_tx.send_replace(AudioLevels::default());
            self.publish(MediaKind::Audio);
        }
    }

    fn publish(&self, kind: MediaKind) -> DeviceStatus {
        let status = match kind {
            MediaKind::Video => {
                let slot = self.video.lock();
                DeviceStatus {
                    kind,
                    active: slot.track.is_some(),
                    facing: Some(slot.facing),
                    label: slot.track.as_ref().map(|track| track.label()),
                    last_error: slot.last_error.clone(),
                }
            }
            MediaKind::Audio => {
                let slot = self.audio.lock();
                DeviceStatus {
                    kind,
                    active: slot.track.is_some(),
                    facing: None,
                    label: slot.track.as_ref().map(|track| track.label()),
                    last_error: slot.last_error.clone(),
                }
            }
        };

        match kind {
            MediaKind::Video => self.video_tx.send_replace(status.clone()),
            MediaKind::Audio => self.audio_tx.send_replace(status.clone()),
        };
        status
    }
}
