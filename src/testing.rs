//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::devices::{AudioTrack, MediaDevices, VideoTrack};
use crate::dispatch::{AnalysisOutcome, AnalysisSink};
use crate::error::{DeviceError, ServiceError, VoiceError};
use crate::models::{
    AnalysisPayload, Assessment, AudioClip, EmergencyType, EndSessionRequest, FacingMode,
    InstructionList, InstructionStep, MediaKind, RawFrame, SessionStatus, SessionTicket,
    StartSessionRequest, VideoFrame,
};
use crate::service::{ReasoningService, ServiceHealth, StepProgress};
use crate::voice::{SpeechSynthesizer, VoiceUtterance};

pub fn instruction_list(texts: &[&str]) -> InstructionList {
    InstructionList::new(
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| InstructionStep {
                step_number: index as u32 + 1,
                display_text: text.to_string(),
                spoken_text: format!("say {text}"),
                duration_secs: None,
                warning: None,
                visual_cue: None,
                requires_confirmation: false,
            })
            .collect(),
    )
}

pub fn payload(steps: &[&str], severity: u8, escalate: bool) -> AnalysisPayload {
    let assessment = Assessment::new(
        EmergencyType::Unconscious,
        Some(severity),
        0.9,
        vec!["person lying on the floor".into()],
        "Check for breathing".into(),
        escalate,
    );
    AnalysisPayload::new(assessment, instruction_list(steps), String::new())
}

/// Horizontal gradient for `variant` 0, vertical otherwise.
pub fn gradient_frame(width: u32, height: u32, variant: u64) -> RawFrame {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = (if variant % 2 == 0 {
                x * 255 / width.max(1)
            } else {
                y * 255 / height.max(1)
            }) as u8;
            rgba.extend_from_slice(&[value, value, value, 255]);
        }
    }
    RawFrame {
        width,
        height,
        rgba,
    }
}

pub fn sample_frame(sequence: u64) -> VideoFrame {
    VideoFrame {
        sequence,
        width: 320,
        height: 240,
        format: "jpeg",
        data_base64: "A".repeat(256),
        phash: None,
        captured_at: Utc::now(),
    }
}

pub fn sample_clip(sequence: u64) -> AudioClip {
    AudioClip {
        sequence,
        sample_rate: 16_000,
        channels: 1,
        duration_ms: 1_000,
        format: "wav",
        data_base64: "UklGRg==".into(),
        captured_at: Utc::now(),
    }
}

/// Poll `condition` on the real clock for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// Devices

pub struct FakeVideoTrack {
    label: String,
    frames_decoded: AtomicU64,
    grabs: AtomicU64,
    grab_delay_ms: AtomicU64,
    stopped: AtomicBool,
    changing: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl FakeVideoTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn set_frames_decoded(&self, frames: u64) {
        self.frames_decoded.store(frames, Ordering::SeqCst);
    }

    /// Block every grab for `delay`, like a slow camera readback.
    pub fn set_grab_delay(&self, delay: Duration) {
        self.grab_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl VideoTrack for FakeVideoTrack {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::SeqCst)
    }

    fn grab_frame(&self) -> Result<RawFrame, DeviceError> {
        if self.is_stopped() {
            return Err(DeviceError::Capture("track stopped".into()));
        }
        let delay_ms = self.grab_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        let variant = if self.changing.load(Ordering::SeqCst) {
            self.grabs.fetch_add(1, Ordering::SeqCst)
        } else {
            0
        };
        Ok(gradient_frame(32, 32, variant))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeAudioTrack {
    sample_rate: u32,
    buffer: Mutex<Vec<f32>>,
    stopped: AtomicBool,
}

impl FakeAudioTrack {
    pub fn push(&self, samples: &[f32]) {
        self.buffer.lock().extend_from_slice(samples);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl AudioTrack for FakeAudioTrack {
    fn label(&self) -> String {
        "fake microphone".into()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDevices {
    video_error: Mutex<Option<DeviceError>>,
    audio_error: Mutex<Option<DeviceError>>,
    video: Mutex<Vec<Arc<FakeVideoTrack>>>,
    audio: Mutex<Vec<Arc<FakeAudioTrack>>>,
    changing_frames: Arc<AtomicBool>,
    live_video: Arc<AtomicUsize>,
    max_live_video: AtomicUsize,
    video_open_delay: Mutex<Duration>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_video(&self, reason: &str) {
        *self.video_error.lock() = Some(DeviceError::PermissionDenied(reason.into()));
    }

    pub fn unplug_video(&self, reason: &str) {
        *self.video_error.lock() = Some(DeviceError::Unavailable(reason.into()));
    }

    pub fn allow_video(&self) {
        *self.video_error.lock() = None;
    }

    /// Hold every camera open for `delay`, like a pending permission prompt.
    pub fn set_video_open_delay(&self, delay: Duration) {
        *self.video_open_delay.lock() = delay;
    }

    pub fn deny_audio(&self, reason: &str) {
        *self.audio_error.lock() = Some(DeviceError::PermissionDenied(reason.into()));
    }

    /// Alternate between two distinct frames on every grab.
    pub fn set_changing_frames(&self, changing: bool) {
        self.changing_frames.store(changing, Ordering::SeqCst);
    }

    pub fn video_tracks(&self) -> Vec<Arc<FakeVideoTrack>> {
        self.video.lock().clone()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<FakeAudioTrack>> {
        self.audio.lock().clone()
    }

    /// Highest number of unstopped camera tracks seen at once.
    pub fn max_live_video(&self) -> usize {
        self.max_live_video.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_video(&self, facing: FacingMode) -> Result<Arc<dyn VideoTrack>, DeviceError> {
        let delay = *self.video_open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.video_error.lock().clone() {
            return Err(err);
        }
        let live = self.live_video.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_video.fetch_max(live, Ordering::SeqCst);

        let track = Arc::new(FakeVideoTrack {
            label: format!("fake camera ({facing:?})"),
            frames_decoded: AtomicU64::new(30),
            grabs: AtomicU64::new(0),
            grab_delay_ms: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            changing: Arc::clone(&self.changing_frames),
            live: Arc::clone(&self.live_video),
        });
        self.video.lock().push(Arc::clone(&track));
        Ok(track)
    }

    async fn open_audio(&self, sample_rate: u32) -> Result<Arc<dyn AudioTrack>, DeviceError> {
        if let Some(err) = self.audio_error.lock().clone() {
            return Err(err);
        }
        let track = Arc::new(FakeAudioTrack {
            sample_rate,
            buffer: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        self.audio.lock().push(Arc::clone(&track));
        Ok(track)
    }
}

// Reasoning service

struct MockConfig {
    start_error: Option<ServiceError>,
    analysis_error: Option<ServiceError>,
    end_error: Option<ServiceError>,
    advance_error: Option<ServiceError>,
    payload: AnalysisPayload,
    video_delay: Duration,
    audio_delay: Duration,
    sessions_started: u64,
}

#[derive(Default)]
struct CallStats {
    total: usize,
    active: usize,
    max_active: usize,
}

pub struct MockReasoningService {
    config: Mutex<MockConfig>,
    stats: Arc<Mutex<HashMap<&'static str, CallStats>>>,
    advanced: Mutex<Vec<u32>>,
}

struct ActiveCall {
    name: &'static str,
    stats: Arc<Mutex<HashMap<&'static str, CallStats>>>,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if let Some(stats) = self.stats.lock().get_mut(self.name) {
            stats.active -= 1;
        }
    }
}

impl MockReasoningService {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(MockConfig {
                start_error: None,
                analysis_error: None,
                end_error: None,
                advance_error: None,
                payload: payload(&["Check responsiveness", "Call for help"], 3, false),
                video_delay: Duration::ZERO,
                audio_delay: Duration::ZERO,
                sessions_started: 0,
            }),
            stats: Arc::new(Mutex::new(HashMap::new())),
            advanced: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_start(&self, err: ServiceError) {
        self.config.lock().start_error = Some(err);
    }

    pub fn fail_analysis(&self, err: ServiceError) {
        self.config.lock().analysis_error = Some(err);
    }

    pub fn fail_end(&self, err: ServiceError) {
        self.config.lock().end_error = Some(err);
    }

    pub fn fail_advance(&self, err: ServiceError) {
        self.config.lock().advance_error = Some(err);
    }

    pub fn clear_failures(&self) {
        let mut config = self.config.lock();
        config.start_error = None;
        config.analysis_error = None;
        config.end_error = None;
        config.advance_error = None;
    }

    pub fn set_payload(&self, payload: AnalysisPayload) {
        self.config.lock().payload = payload;
    }

    pub fn set_delay(&self, kind: MediaKind, delay: Duration) {
        let mut config = self.config.lock();
        match kind {
            MediaKind::Video => config.video_delay = delay,
            MediaKind::Audio => config.audio_delay = delay,
        }
    }

    /// Calls made to `name` ("start", "frame", "audio", "advance", "end", "health").
    pub fn calls(&self, name: &str) -> usize {
        self.stats.lock().get(name).map_or(0, |stats| stats.total)
    }

    pub fn max_concurrent(&self, name: &str) -> usize {
        self.stats.lock().get(name).map_or(0, |stats| stats.max_active)
    }

    /// `current_step` values sent with each advance call.
    pub fn advanced_steps(&self) -> Vec<u32> {
        self.advanced.lock().clone()
    }

    fn enter(&self, name: &'static str) -> ActiveCall {
        let mut stats = self.stats.lock();
        let entry = stats.entry(name).or_default();
        entry.total += 1;
        entry.active += 1;
        entry.max_active = entry.max_active.max(entry.active);
        ActiveCall {
            name,
            stats: Arc::clone(&self.stats),
        }
    }

    async fn analyze(&self, name: &'static str, kind: MediaKind) -> Result<AnalysisPayload, ServiceError> {
        let _call = self.enter(name);
        let delay = match kind {
            MediaKind::Video => self.config.lock().video_delay,
            MediaKind::Audio => self.config.lock().audio_delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let config = self.config.lock();
        match &config.analysis_error {
            Some(err) => Err(err.clone()),
            None => Ok(config.payload.clone()),
        }
    }
}

impl Default for MockReasoningService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningService for MockReasoningService {
    async fn start_session(
        &self,
        _request: &StartSessionRequest,
    ) -> Result<SessionTicket, ServiceError> {
        let _call = self.enter("start");
        let mut config = self.config.lock();
        if let Some(err) = &config.start_error {
            return Err(err.clone());
        }
        config.sessions_started += 1;
        Ok(SessionTicket {
            session_id: format!("session-{}", config.sessions_started),
            status: SessionStatus::Active,
            started_at: Utc::now(),
            current_step: 0,
            total_steps: 0,
        })
    }

    async fn analyze_frame(
        &self,
        _session_id: &str,
        _frame: &VideoFrame,
    ) -> Result<AnalysisPayload, ServiceError> {
        self.analyze("frame", MediaKind::Video).await
    }

    async fn analyze_audio(
        &self,
        _session_id: &str,
        _clip: &AudioClip,
    ) -> Result<AnalysisPayload, ServiceError> {
        self.analyze("audio", MediaKind::Audio).await
    }

    async fn advance_step(
        &self,
        _session_id: &str,
        current_step: u32,
    ) -> Result<StepProgress, ServiceError> {
        let _call = self.enter("advance");
        self.advanced.lock().push(current_step);
        let config = self.config.lock();
        if let Some(err) = &config.advance_error {
            return Err(err.clone());
        }
        let total_steps = config.payload.instruction_count as u32;
        if current_step >= total_steps {
            return Ok(StepProgress::Complete);
        }
        let next = config.payload.instructions.step(current_step as usize + 1);
        Ok(StepProgress::Next {
            current_step: current_step + 1,
            total_steps,
            voice_text: next.map(|step| step.spoken_text.clone()).unwrap_or_default(),
        })
    }

    async fn end_session(
        &self,
        _session_id: &str,
        _request: &EndSessionRequest,
    ) -> Result<(), ServiceError> {
        let _call = self.enter("end");
        match &self.config.lock().end_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn health(&self) -> Result<ServiceHealth, ServiceError> {
        let _call = self.enter("health");
        Ok(ServiceHealth {
            status: "healthy".into(),
            gemini_connected: true,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// Voice

pub struct RecordingSynthesizer {
    delay: Duration,
    failure: Mutex<Option<VoiceError>>,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl RecordingSynthesizer {
    /// Every utterance takes `delay` to speak.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failure: Mutex::new(None),
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, err: VoiceError) {
        *self.failure.lock() = Some(err);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, utterance: &VoiceUtterance) -> Result<(), VoiceError> {
        self.started.lock().push(utterance.text.clone());
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        tokio::time::sleep(self.delay).await;
        self.completed.lock().push(utterance.text.clone());
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// Dispatch

#[derive(Default)]
pub struct RecordingSink {
    outcomes: Mutex<Vec<(MediaKind, &'static str)>>,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<(MediaKind, &'static str)> {
        self.outcomes.lock().clone()
    }
}

impl AnalysisSink for RecordingSink {
    fn on_outcome(&self, kind: MediaKind, outcome: &AnalysisOutcome) {
        self.outcomes.lock().push((kind, outcome.label()));
    }
}
