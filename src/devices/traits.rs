use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeviceError;
use crate::models::{FacingMode, RawFrame};

/// A live camera track.
pub trait VideoTrack: Send + Sync {
    fn label(&self) -> String;

    /// Frames decoded since the track started; used as the readiness signal.
    fn frames_decoded(&self) -> u64;

    /// Copy out the most recent decoded frame.
    fn grab_frame(&self) -> Result<RawFrame, DeviceError>;

    /// Stop the track and release the hardware. Must be idempotent.
    fn stop(&self);
}

/// A live microphone track delivering mono f32 PCM.
pub trait AudioTrack: Send + Sync {
    fn label(&self) -> String;

    fn sample_rate(&self) -> u32;

    /// Drain every sample buffered since the previous call.
    fn take_samples(&self) -> Vec<f32>;

    /// Stop the track and release the hardware. Must be idempotent.
    fn stop(&self);
}

/// Platform stream acquisition, the `getUserMedia` seam.
///
/// Acquisition may wait on a permission prompt for as long as the user takes;
/// callers never put a timeout on it.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_video(&self, facing: FacingMode) -> Result<Arc<dyn VideoTrack>, DeviceError>;

    async fn open_audio(&self, sample_rate: u32) -> Result<Arc<dyn AudioTrack>, DeviceError>;
}
