use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::devices::{DeviceStreamManager, FrameGrab};
use crate::dispatch::{AnalysisDispatcher, AnalysisOutcome, AnalysisSink, FlightGuard, SingleFlight};
use crate::error::DeviceError;
use crate::metrics::{CaptureMetrics, CaptureResult, MetricsCollector};
use crate::models::{AudioClip, CaptureOutcome, MediaKind, MediaSample, SkipReason, VideoFrame};
use crate::settings::GuardianSettings;

use super::clip::{self, encode_clip};
use super::frame::{encode_frame, hamming_distance};
use super::loop_worker::capture_loop;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub jpeg_quality: u8,
    pub max_frame_width: u32,
    pub unchanged_threshold: u32,
    pub max_frame_staleness: Duration,
    pub min_clip_ms: u64,
    pub max_clip_ms: u64,
}

impl CaptureConfig {
    pub fn from_settings(settings: &GuardianSettings) -> Self {
        Self {
            jpeg_quality: settings.jpeg_quality,
            max_frame_width: settings.max_frame_width,
            unchanged_threshold: settings.unchanged_threshold,
            max_frame_staleness: settings.max_frame_staleness(),
            min_clip_ms: settings.min_clip_ms,
            max_clip_ms: settings.max_clip_ms,
        }
    }
}

/// Snapshot of the recurring work for one stream kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub kind: MediaKind,
    pub interval: Duration,
    pub enabled: bool,
    pub last_capture_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

struct SchedulerState {
    /// Bumped on every enable and disable. Outcomes carry the epoch they were
    /// captured under and are dropped if it no longer matches.
    epoch: u64,
    enabled: bool,
    interval: Duration,
    last_video_at: Option<DateTime<Utc>>,
    last_audio_at: Option<DateTime<Utc>>,
    ticker: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    last_phash: Option<String>,
    last_submit_at: Option<Instant>,
}

impl SchedulerState {
    fn halt_ticker(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

pub(super) struct SchedulerInner {
    devices: Arc<DeviceStreamManager>,
    dispatcher: Arc<AnalysisDispatcher>,
    sink: Arc<dyn AnalysisSink>,
    metrics: MetricsCollector,
    config: CaptureConfig,
    flights: SingleFlight<MediaKind>,
    video_sequence: AtomicU64,
    audio_sequence: AtomicU64,
    state: Mutex<SchedulerState>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.state.get_mut().halt_ticker();
    }
}

enum Extracted {
    Frame { frame: VideoFrame, bytes: usize },
    Skipped(SkipReason),
}

/// Periodic frame capture and push-to-talk clips, feeding the dispatcher.
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<SchedulerInner>,
}

/// Handle the capture loop holds so it never keeps the scheduler alive.
pub(super) struct WeakCaptureScheduler(Weak<SchedulerInner>);

impl WeakCaptureScheduler {
    pub(super) fn upgrade(&self) -> Option<CaptureScheduler> {
        self.0.upgrade().map(|inner| CaptureScheduler { inner })
    }
}

impl CaptureScheduler {
    pub fn new(
        devices: Arc<DeviceStreamManager>,
        dispatcher: Arc<AnalysisDispatcher>,
        sink: Arc<dyn AnalysisSink>,
        metrics: MetricsCollector,
        config: CaptureConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                devices,
                dispatcher,
                sink,
                metrics,
                config,
                flights: SingleFlight::new(),
                video_sequence: AtomicU64::new(0),
                audio_sequence: AtomicU64::new(0),
                state: Mutex::new(SchedulerState {
                    epoch: 0,
                    enabled: false,
                    interval: Duration::ZERO,
                    last_video_at: None,
                    last_audio_at: None,
                    ticker: None,
                    cancel_token: None,
                    last_phash: None,
                    last_submit_at: None,
                }),
            }),
        }
    }

    /// Start periodic capture. Extraction runs once immediately, then every
    /// `interval`. Calling it again restarts the schedule under a new epoch.
    pub fn enable(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut state = self.inner.state.lock();
        state.halt_ticker();

        state.epoch += 1;
        state.enabled = true;
        state.interval = interval;
        state.last_phash = None;
        state.last_submit_at = None;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(
            self.downgrade(),
            state.epoch,
            interval,
            cancel_token.clone(),
            self.inner.devices.subscribe(MediaKind::Video),
        ));
        state.ticker = Some(handle);
        state.cancel_token = Some(cancel_token);
        log_info!(
            "capture enabled every {}ms (epoch {})",
            interval.as_millis(),
            state.epoch
        );
    }

    /// Stop capture. Idempotent. Once this returns no new tick starts and any
    /// outcome still in flight is discarded on arrival.
    pub fn disable(&self) {
        let mut state = self.inner.state.lock();
        state.halt_ticker();
        if state.enabled {
            state.enabled = false;
            state.epoch += 1;
            log_info!("capture disabled (epoch {})", state.epoch);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    pub fn job(&self, kind: MediaKind) -> CaptureJob {
        let state = self.inner.state.lock();
        CaptureJob {
            kind,
            interval: state.interval,
            enabled: state.enabled,
            last_capture_at: match kind {
                MediaKind::Video => state.last_video_at,
                MediaKind::Audio => state.last_audio_at,
            },
            in_flight: self.inner.flights.is_in_flight(&kind),
        }
    }

    /// Extract one frame without submitting it.
    pub async fn capture_now(&self) -> Result<CaptureOutcome, DeviceError> {
        let Some(_flight) = self.inner.flights.try_acquire(MediaKind::Video) else {
            return Ok(CaptureOutcome::Skipped(SkipReason::InFlight));
        };

        Ok(match self.extract_frame().await? {
            Extracted::Frame { frame, .. } => CaptureOutcome::Captured(MediaSample::Frame(frame)),
            Extracted::Skipped(reason) => CaptureOutcome::Skipped(reason),
        })
    }

    /// Arm the microphone buffer for a push-to-talk clip.
    pub fn begin_talk(&self) -> Result<(), DeviceError> {
        self.inner.devices.begin_recording()?;
        log_debug!("push-to-talk recording");
        Ok(())
    }

    /// Close the push-to-talk clip and submit it in the background.
    pub async fn finish_talk(&self) -> Result<CaptureOutcome, DeviceError> {
        let recorded = match self.inner.devices.finish_recording() {
            Ok(recorded) => recorded,
            Err(DeviceError::NotActive(_)) => {
                return Ok(self.skip(MediaKind::Audio, SkipReason::StreamInactive).await)
            }
            Err(err) => return Err(err),
        };

        let acquired = {
            let mut state = self.inner.state.lock();
            if !state.enabled {
                Err(SkipReason::Disabled)
            } else if let Some(flight) = self.inner.flights.try_acquire(MediaKind::Audio) {
                state.last_audio_at = Some(Utc::now());
                Ok((state.epoch, flight))
            } else {
                Err(SkipReason::InFlight)
            }
        };
        let (epoch, flight) = match acquired {
            Ok(acquired) => acquired,
            Err(reason) => return Ok(self.skip(MediaKind::Audio, reason).await),
        };

        let recorded_ms = clip::duration_ms(recorded.samples.len(), recorded.sample_rate);
        if recorded_ms < self.inner.config.min_clip_ms {
            log_debug!("push-to-talk released after {recorded_ms}ms");
            return Ok(self.skip(MediaKind::Audio, SkipReason::TooShort).await);
        }

        let started = Instant::now();
        let max_ms = self.inner.config.max_clip_ms;
        let encoded = tokio::task::spawn_blocking(move || {
            encode_clip(&recorded.samples, recorded.sample_rate, max_ms)
        })
        .await
        .map_err(|err| DeviceError::Capture(format!("clip encoder worker failed: {err}")))??;
        let extract_ms = started.elapsed().as_millis() as u64;

        let clip = AudioClip {
            sequence: self.inner.audio_sequence.fetch_add(1, Ordering::SeqCst) + 1,
            sample_rate: encoded.sample_rate,
            channels: encoded.channels,
            duration_ms: encoded.duration_ms,
            format: "wav",
            data_base64: encoded.wav_base64,
            captured_at: Utc::now(),
        };
        log_info!("audio clip #{} ({}ms) captured", clip.sequence, clip.duration_ms);

        let bytes = clip.data_base64.len();
        let sample = MediaSample::Clip(clip);
        let this = self.clone();
        let submitted = sample.clone();
        tokio::spawn(async move {
            this.dispatch(epoch, submitted, extract_ms, bytes, flight).await;
        });

        Ok(CaptureOutcome::Captured(sample))
    }

    /// Called by the capture loop. Returns false when the loop should exit.
    pub(super) async fn on_tick(&self, epoch: u64) -> bool {
        let acquired = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch || !state.enabled {
                return false;
            }
            if !self.inner.devices.is_active(MediaKind::Video) {
                Err(SkipReason::StreamInactive)
            } else if let Some(flight) = self.inner.flights.try_acquire(MediaKind::Video) {
                state.last_video_at = Some(Utc::now());
                Ok(flight)
            } else {
                Err(SkipReason::InFlight)
            }
        };

        match acquired {
            Ok(flight) => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.run_video_capture(epoch, flight).await;
                });
            }
            Err(reason) => {
                self.skip(MediaKind::Video, reason).await;
            }
        }
        true
    }

    pub(super) fn downgrade(&self) -> WeakCaptureScheduler {
        WeakCaptureScheduler(Arc::downgrade(&self.inner))
    }

    async fn run_video_capture(&self, epoch: u64, flight: FlightGuard<MediaKind>) {
        let started = Instant::now();
        let (frame, bytes) = match self.extract_frame().await {
            Ok(Extracted::Frame { frame, bytes }) => (frame, bytes),
            Ok(Extracted::Skipped(reason)) => {
                self.skip(MediaKind::Video, reason).await;
                return;
            }
            Err(err) => {
                log_error!("frame extraction failed: {err}");
                self.record(CaptureMetrics {
                    extract_ms: started.elapsed().as_millis() as u64,
                    ..CaptureMetrics::new(MediaKind::Video, CaptureResult::Failed)
                })
                .await;
                return;
            }
        };
        let extract_ms = started.elapsed().as_millis() as u64;

        self.dispatch(epoch, MediaSample::Frame(frame), extract_ms, bytes, flight)
            .await;
    }

    async fn extract_frame(&self) -> Result<Extracted, DeviceError> {
        let raw = match self.inner.devices.grab_frame() {
            Ok(FrameGrab::Ready(raw)) => raw,
            Ok(FrameGrab::NotReady { frames_decoded }) => {
                log_debug!("video not ready ({frames_decoded} frames decoded)");
                return Ok(Extracted::Skipped(SkipReason::NotReady));
            }
            Err(DeviceError::NotActive(_)) => return Ok(Extracted::Skipped(SkipReason::StreamInactive)),
            Err(err) => return Err(err),
        };

        let quality = self.inner.config.jpeg_quality;
        let max_width = self.inner.config.max_frame_width;
        let encoded = tokio::task::spawn_blocking(move || encode_frame(raw, quality, max_width))
            .await
            .map_err(|err| DeviceError::Capture(format!("frame encoder worker failed: {err}")))??;

        if self.is_unchanged(&encoded.phash) {
            log_debug!("frame unchanged since last analysis, skipping");
            return Ok(Extracted::Skipped(SkipReason::Unchanged));
        }

        Ok(Extracted::Frame {
            bytes: encoded.jpeg_bytes,
            frame: VideoFrame {
                sequence: self.inner.video_sequence.fetch_add(1, Ordering::SeqCst) + 1,
                width: encoded.width,
                height: encoded.height,
                format: "jpeg",
                data_base64: encoded.jpeg_base64,
                phash: Some(encoded.phash),
                captured_at: Utc::now(),
            },
        })
    }

    fn is_unchanged(&self, phash: &str) -> bool {
        let state = self.inner.state.lock();
        let (Some(last_phash), Some(last_submit_at)) = (&state.last_phash, state.last_submit_at)
        else {
            return false;
        };
        if last_submit_at.elapsed() >= self.inner.config.max_frame_staleness {
            return false;
        }
        hamming_distance(phash, last_phash) <= self.inner.config.unchanged_threshold
    }

    /// Submit, then hand the outcome to the sink if its epoch is still current.
    /// The flight guard is held until the outcome is delivered or dropped.
    async fn dispatch(
        &self,
        epoch: u64,
        sample: MediaSample,
        extract_ms: u64,
        payload_bytes: usize,
        _flight: FlightGuard<MediaKind>,
    ) {
        let kind = sample.kind();
        let sequence = sample.sequence();
        let phash = match &sample {
            MediaSample::Frame(frame) => frame.phash.clone(),
            MediaSample::Clip(_) => None,
        };

        // Extraction can outlast a disable; nothing new reaches the service
        // once the epoch has moved on.
        let stale = self.inner.state.lock().epoch != epoch;
        if stale {
            log_info!("dropping {kind} #{sequence} captured before disable (epoch {epoch})");
            self.record(CaptureMetrics {
                sequence: Some(sequence),
                extract_ms,
                payload_bytes,
                ..CaptureMetrics::new(kind, CaptureResult::Discarded)
            })
            .await;
            return;
        }

        let started = Instant::now();
        let outcome = self.inner.dispatcher.submit(sample).await;
        let dispatch_ms = started.elapsed().as_millis() as u64;

        let result = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                log_info!(
                    "discarding {kind} #{sequence} outcome ({}) from epoch {epoch}",
                    outcome.label()
                );
                CaptureResult::Discarded
            } else {
                if let (AnalysisOutcome::Completed(_), Some(phash)) = (&outcome, phash) {
                    state.last_phash = Some(phash);
                    state.last_submit_at = Some(Instant::now());
                }
                self.inner.sink.on_outcome(kind, &outcome);
                match outcome {
                    AnalysisOutcome::Completed(_) => CaptureResult::Completed,
                    AnalysisOutcome::Busy => CaptureResult::Busy,
                    AnalysisOutcome::TimedOut { .. } => CaptureResult::TimedOut,
                    AnalysisOutcome::Failed(_) => CaptureResult::Failed,
                }
            }
        };

        let (cpu_percent, memory_mb) = self.inner.metrics.sample_system_metrics().await;
        self.record(CaptureMetrics {
            timestamp: Utc::now(),
            kind,
            sequence: Some(sequence),
            result,
            extract_ms,
            dispatch_ms: Some(dispatch_ms),
            payload_bytes,
            cpu_percent,
            memory_mb,
        })
        .await;
    }

    async fn skip(&self, kind: MediaKind, reason: SkipReason) -> CaptureOutcome {
        log_debug!("{kind} capture skipped: {}", reason.as_str());
        self.record(CaptureMetrics::skipped(kind, reason)).await;
        CaptureOutcome::Skipped(reason)
    }

    async fn record(&self, metrics: CaptureMetrics) {
        self.inner.metrics.record_capture(metrics).await;
    }
}
