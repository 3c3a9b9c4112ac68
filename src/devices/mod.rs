pub mod manager;
pub mod meter;
pub mod still;
pub mod traits;

pub use manager::{DeviceStatus, DeviceStreamManager, FrameGrab, RecordedAudio};
pub use meter::AudioLevels;
pub use still::StillImageDevices;
pub use traits::{AudioTrack, MediaDevices, VideoTrack};
