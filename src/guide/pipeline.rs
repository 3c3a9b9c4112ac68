use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureConfig, CaptureScheduler};
use crate::devices::{AudioLevels, DeviceStatus, DeviceStreamManager, MediaDevices};
use crate::dispatch::AnalysisDispatcher;
use crate::error::{DeviceError, ServiceError, SessionTransitionError};
use crate::instructions::{Advance, InstructionProgress, InstructionStateMachine};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::models::{
    CaptureOutcome, EndSessionRequest, MediaKind, StartSessionRequest, StreamOptions,
};
use crate::service::{ReasoningService, ServiceHealth};
use crate::session::{ActiveSession, EndOutcome, SessionState, SessionStateMachine};
use crate::settings::GuardianSettings;
use crate::voice::{SpeechSynthesizer, VoiceGuidanceSynchronizer, VoiceState};

use super::apply::OutcomeApplier;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const METER_PERIOD: Duration = Duration::from_millis(100);

struct MeterTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MeterTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// One guided emergency session: owns the devices, capture schedule,
/// session and instruction state, and the voice that reads guidance aloud.
pub struct GuidePipeline {
    settings: GuardianSettings,
    service: Arc<dyn ReasoningService>,
    devices: Arc<DeviceStreamManager>,
    session: Arc<SessionStateMachine>,
    instructions: Arc<InstructionStateMachine>,
    voice: Arc<VoiceGuidanceSynchronizer>,
    scheduler: CaptureScheduler,
    metrics: MetricsCollector,
    meter: Mutex<Option<MeterTask>>,
    /// Bumped by every `end()`. A `start()` that sees it move while waiting
    /// on a device backs out instead of bringing capture up.
    teardowns: Mutex<u64>,
}

impl GuidePipeline {
    pub fn new(
        settings: GuardianSettings,
        service: Arc<dyn ReasoningService>,
        media: Arc<dyn MediaDevices>,
        synth: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let devices = Arc::new(DeviceStreamManager::new(media, settings.min_ready_frames));
        let session = Arc::new(SessionStateMachine::new(Arc::clone(&service)));
        let instructions = Arc::new(InstructionStateMachine::new());
        let voice = VoiceGuidanceSynchronizer::new(synth, settings.voice_enabled);
        let metrics = MetricsCollector::new();

        let dispatcher = Arc::new(AnalysisDispatcher::new(
            Arc::clone(&service),
            Arc::clone(&session),
            settings.frame_timeout(),
            settings.audio_timeout(),
        ));
        let applier = Arc::new(OutcomeApplier::new(
            Arc::clone(&session),
            Arc::clone(&instructions),
        ));
        let scheduler = CaptureScheduler::new(
            Arc::clone(&devices),
            dispatcher,
            applier,
            metrics.clone(),
            CaptureConfig::from_settings(&settings),
        );

        Self {
            settings,
            service,
            devices,
            session,
            instructions,
            voice,
            scheduler,
            metrics,
            meter: Mutex::new(None),
            teardowns: Mutex::new(0),
        }
    }

    /// Open a session and begin capturing.
    ///
    /// Device failures do not fail the session; they are reported through
    /// the device status channels and capture simply skips until a stream
    /// is available. If `end()` runs while a device is still being opened,
    /// the stream is released and start fails with `InvalidState`.
    pub async fn start(
        &self,
        user_notes: Option<String>,
        location: Option<String>,
    ) -> Result<ActiveSession, SessionTransitionError> {
        let active = self
            .session
            .start(StartSessionRequest::new(user_notes, location))
            .await?;
        let generation = *self.teardowns.lock();

        self.instructions.reset();
        self.voice.follow(self.instructions.subscribe_spoken());

        if let Err(err) = self
            .devices
            .acquire(StreamOptions::Video {
                facing: self.settings.facing_mode,
            })
            .await
        {
            log_warn!("camera unavailable: {}", err);
        }
        self.ensure_not_torn_down(generation, &[MediaKind::Video])?;

        let microphone = match self
            .devices
            .acquire(StreamOptions::Audio {
                sample_rate: self.settings.audio_sample_rate,
            })
            .await
        {
            Ok(_) => true,
            Err(err) => {
                log_warn!("microphone unavailable: {}", err);
                false
            }
        };

        // Checked and enabled under the same lock `end()` tears down under.
        let teardowns = self.teardowns.lock();
        if *teardowns != generation {
            drop(teardowns);
            return Err(self.abandon_start(&[MediaKind::Video, MediaKind::Audio]));
        }
        if microphone {
            self.start_meter();
        }
        self.scheduler.enable(self.settings.frame_interval());
        drop(teardowns);

        log_info!("session {} started", active.session_id);
        Ok(active)
    }

    /// Move to the next instruction. The service is told about the step
    /// that was just finished in the background; its reply does not gate
    /// local progress.
    pub fn advance(&self) -> Advance {
        let result = self.instructions.advance();
        let finished_step = match &result {
            Advance::Advanced(step) => step.step_number.saturating_sub(1),
            Advance::Completed => self.instructions.progress().total_steps as u32,
            Advance::Rejected => return result,
        };

        if let Some(session_id) = self.session.session_id() {
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                match service.advance_step(&session_id, finished_step).await {
                    Ok(progress) => log_debug!("remote advance from step {}: {:?}", finished_step, progress),
                    Err(err) => log_warn!("remote advance from step {} failed: {}", finished_step, err),
                }
            });
        }

        result
    }

    pub fn begin_talk(&self) -> Result<(), DeviceError> {
        self.scheduler.begin_talk()
    }

    pub async fn finish_talk(&self) -> Result<CaptureOutcome, DeviceError> {
        self.scheduler.finish_talk().await
    }

    pub async fn switch_camera(&self) -> Result<DeviceStatus, DeviceError> {
        self.devices.switch_facing().await
    }

    pub async fn capture_now(&self) -> Result<CaptureOutcome, DeviceError> {
        self.scheduler.capture_now().await
    }

    /// Stop capture, release the devices, silence the voice, then end the
    /// session. Local teardown happens even when the session was never
    /// started.
    pub async fn end(
        &self,
        reason: &str,
        emergency_services_called: bool,
    ) -> Result<EndOutcome, SessionTransitionError> {
        {
            let mut teardowns = self.teardowns.lock();
            *teardowns += 1;
            self.scheduler.disable();
            self.stop_meter();
            self.devices.release_all();
        }
        self.voice.stop();

        let outcome = self
            .session
            .end(EndSessionRequest::new(reason, emergency_services_called))
            .await?;
        if let EndOutcome::Ended {
            session,
            remote_error: Some(err),
        } = &outcome
        {
            log_warn!(
                "session {} ended locally, service not notified: {}",
                session.session_id,
                err
            );
        }
        Ok(outcome)
    }

    pub async fn health(&self) -> Result<ServiceHealth, ServiceError> {
        self.service.health().await
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot().await
    }

    pub fn session(&self) -> SessionState {
        self.session.snapshot()
    }

    pub fn progress(&self) -> InstructionProgress {
        self.instructions.progress()
    }

    pub fn device_status(&self, kind: MediaKind) -> DeviceStatus {
        self.devices.status(kind)
    }

    pub fn voice(&self) -> &Arc<VoiceGuidanceSynchronizer> {
        &self.voice
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<InstructionProgress> {
        self.instructions.subscribe()
    }

    pub fn subscribe_voice(&self) -> watch::Receiver<VoiceState> {
        self.voice.subscribe()
    }

    pub fn subscribe_device(&self, kind: MediaKind) -> watch::Receiver<DeviceStatus> {
        self.devices.subscribe(kind)
    }

    pub fn subscribe_levels(&self) -> watch::Receiver<AudioLevels> {
        self.devices.subscribe_levels()
    }

    fn ensure_not_torn_down(
        &self,
        generation: u64,
        opened: &[MediaKind],
    ) -> Result<(), SessionTransitionError> {
        if *self.teardowns.lock() == generation {
            Ok(())
        } else {
            Err(self.abandon_start(opened))
        }
    }

    /// Undo what a start opened after the session was ended under it.
    fn abandon_start(&self, opened: &[MediaKind]) -> SessionTransitionError {
        for kind in opened {
            self.devices.release(*kind);
        }
        let state = self.session.snapshot().name();
        log_info!("session ended while starting, releasing devices");
        SessionTransitionError::InvalidState {
            operation: "start",
            state,
        }
    }

    fn start_meter(&self) {
        let cancel = CancellationToken::new();
        let devices = Arc::clone(&self.devices);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(METER_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !devices.is_active(MediaKind::Audio) {
                            break;
                        }
                        devices.meter();
                    }
                }
            }
        });

        if let Some(previous) = self.meter.lock().replace(MeterTask { cancel, handle }) {
            previous.stop();
        }
    }

    fn stop_meter(&self) {
        if let Some(task) = self.meter.lock().take() {
            task.stop();
        }
    }
}

impl Drop for GuidePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.meter.get_mut().take() {
            task.stop();
        }
        self.scheduler.disable();
        self.devices.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::testing::{wait_until, FakeDevices, MockReasoningService, RecordingSynthesizer};

    struct Harness {
        pipeline: GuidePipeline,
        service: Arc<MockReasoningService>,
        devices: Arc<FakeDevices>,
        synth: Arc<RecordingSynthesizer>,
    }

    fn harness() -> Harness {
        let service = Arc::new(MockReasoningService::new());
        let devices = Arc::new(FakeDevices::new());
        let synth = Arc::new(RecordingSynthesizer::new(Duration::ZERO));
        let settings = GuardianSettings {
            frame_interval_ms: 5_000,
            ..GuardianSettings::default()
        };
        let pipeline = GuidePipeline::new(
            settings,
            service.clone(),
            devices.clone(),
            synth.clone(),
        );
        Harness {
            pipeline,
            service,
            devices,
            synth,
        }
    }

    #[tokio::test]
    async fn guides_through_a_full_session() {
        let h = harness();
        h.pipeline.start(Some("fell off a ladder".into()), None).await.unwrap();
        assert!(h.pipeline.device_status(MediaKind::Video).active);
        assert!(h.pipeline.device_status(MediaKind::Audio).active);

        // The first frame is analyzed right away and its steps are read out.
        assert!(wait_until(|| h.pipeline.progress().total_steps == 2).await);
        assert!(
            wait_until(|| h
                .synth
                .completed()
                .iter()
                .any(|text| text.ends_with("Step 1: say Check responsiveness")))
            .await
        );
        assert_eq!(
            h.pipeline.session().assessment().map(|a| a.severity.level()),
            Some(3)
        );

        match h.pipeline.advance() {
            Advance::Advanced(step) => assert_eq!(step.step_number, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(wait_until(|| h.synth.completed().contains(&"say Call for help".to_string())).await);

        assert_eq!(h.pipeline.advance(), Advance::Completed);
        assert_eq!(h.pipeline.advance(), Advance::Rejected);
        assert!(wait_until(|| h.service.advanced_steps() == vec![1, 2]).await);

        let outcome = h.pipeline.end("Situation resolved", false).await.unwrap();
        match outcome {
            EndOutcome::Ended {
                session,
                remote_error,
            } => {
                assert_eq!(session.status, SessionStatus::Resolved);
                assert!(remote_error.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!h.pipeline.scheduler().is_enabled());
        assert!(!h.pipeline.device_status(MediaKind::Video).active);
        assert!(h.devices.video_tracks().iter().all(|track| track.is_stopped()));
        assert!(h.devices.audio_tracks().iter().all(|track| track.is_stopped()));
        assert_eq!(h.pipeline.voice().state(), VoiceState::Idle);
        assert_eq!(h.service.calls("end"), 1);
    }

    #[tokio::test]
    async fn device_failures_do_not_block_the_session() {
        let h = harness();
        h.devices.deny_video("camera blocked");
        h.devices.deny_audio("mic blocked");

        h.pipeline.start(None, None).await.unwrap();
        assert!(h.pipeline.session().is_active());
        assert!(h.pipeline.scheduler().is_enabled());

        let video = h.pipeline.device_status(MediaKind::Video);
        assert!(!video.active);
        assert!(matches!(video.last_error, Some(DeviceError::PermissionDenied(_))));
        assert_eq!(h.service.calls("frame"), 0);

        h.pipeline.end("User cancelled", false).await.unwrap();
    }

    #[tokio::test]
    async fn failed_remote_advance_does_not_undo_local_progress() {
        let h = harness();
        h.service
            .fail_advance(ServiceError::Transport("connection reset".into()));
        h.pipeline.start(None, None).await.unwrap();
        assert!(wait_until(|| h.pipeline.progress().total_steps == 2).await);

        assert!(matches!(h.pipeline.advance(), Advance::Advanced(_)));
        assert!(wait_until(|| h.service.calls("advance") == 1).await);
        assert_eq!(h.pipeline.progress().current_step, 2);

        h.pipeline.end("User cancelled", false).await.unwrap();
    }

    #[tokio::test]
    async fn ending_while_the_camera_opens_leaves_capture_off() {
        let Harness {
            pipeline,
            service,
            devices,
            ..
        } = harness();
        devices.set_video_open_delay(Duration::from_millis(300));
        let pipeline = Arc::new(pipeline);

        let starting = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.start(None, None).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.end("User cancelled", false).await.unwrap();

        let result = starting.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionTransitionError::InvalidState {
                operation: "start",
                state: "ended"
            })
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pipeline.session().name(), "ended");
        assert!(!pipeline.scheduler().is_enabled());
        assert!(!pipeline.device_status(MediaKind::Video).active);
        assert!(!pipeline.device_status(MediaKind::Audio).active);
        assert_eq!(devices.video_tracks().len(), 1);
        assert!(devices.video_tracks().iter().all(|track| track.is_stopped()));
        assert!(devices.audio_tracks().is_empty());
        assert_eq!(service.calls("frame"), 0);
    }

    #[tokio::test]
    async fn ending_twice_reports_already_ended() {
        let h = harness();
        h.pipeline.start(None, None).await.unwrap();

        h.pipeline.end("User cancelled", false).await.unwrap();
        let second = h.pipeline.end("User cancelled", false).await.unwrap();
        assert!(matches!(second, EndOutcome::AlreadyEnded));
        assert_eq!(h.service.calls("end"), 1);
    }

    #[tokio::test]
    async fn ending_without_a_session_still_tears_down() {
        let h = harness();
        let result = h.pipeline.end("User cancelled", false).await;
        assert!(matches!(
            result,
            Err(SessionTransitionError::InvalidState { .. })
        ));
        assert!(!h.pipeline.scheduler().is_enabled());
    }
}
