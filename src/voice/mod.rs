mod console;
pub mod synchronizer;

pub use console::ConsoleSynthesizer;
pub use synchronizer::{SpeechSynthesizer, VoiceGuidanceSynchronizer, VoiceState, VoiceUtterance};
