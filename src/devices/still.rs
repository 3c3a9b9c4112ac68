//! Headless devices for running the pipeline without camera hardware.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::DeviceError;
use crate::models::{FacingMode, RawFrame};

use super::traits::{AudioTrack, MediaDevices, VideoTrack};

const SIMULATED_FPS: u64 = 30;

/// Serves one still image as the camera feed. No microphone.
pub struct StillImageDevices {
    frame: Arc<RawFrame>,
    name: String,
}

impl StillImageDevices {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to load still frame from {}", path.display()))?
            .to_rgba8();

        let (width, height) = image.dimensions();
        Ok(Self {
            frame: Arc::new(RawFrame {
                width,
                height,
                rgba: image.into_raw(),
            }),
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "still".into()),
        })
    }
}

#[async_trait]
impl MediaDevices for StillImageDevices {
    async fn open_video(&self, facing: FacingMode) -> Result<Arc<dyn VideoTrack>, DeviceError> {
        Ok(Arc::new(StillTrack {
            frame: Arc::clone(&self.frame),
            label: format!("{} ({facing:?})", self.name),
            opened_at: Instant::now(),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn open_audio(&self, _sample_rate: u32) -> Result<Arc<dyn AudioTrack>, DeviceError> {
        Err(DeviceError::Unavailable(
            "no microphone when running from a still image".into(),
        ))
    }
}

struct StillTrack {
    frame: Arc<RawFrame>,
    label: String,
    opened_at: Instant,
    stopped: AtomicBool,
}

impl VideoTrack for StillTrack {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn frames_decoded(&self) -> u64 {
        if self.stopped.load(Ordering::SeqCst) {
            return 0;
        }
        self.opened_at.elapsed().as_millis() as u64 * SIMULATED_FPS / 1000
    }

    fn grab_frame(&self) -> Result<RawFrame, DeviceError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DeviceError::Capture("track stopped".into()));
        }
        Ok(self.frame.as_ref().clone())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
