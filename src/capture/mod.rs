pub mod clip;
pub mod controller;
pub mod frame;
mod loop_worker;

pub use controller::{CaptureConfig, CaptureJob, CaptureScheduler};
