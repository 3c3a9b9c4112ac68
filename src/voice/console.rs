use std::time::Duration;

use async_trait::async_trait;
use log::info;

use crate::error::VoiceError;

use super::synchronizer::{SpeechSynthesizer, VoiceUtterance};

const WORDS_PER_MINUTE: u64 = 160;

/// Writes utterances to the log and holds for roughly the time it would take
/// to say them, so supersession behaves as it would with real speech.
pub struct ConsoleSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, utterance: &VoiceUtterance) -> Result<(), VoiceError> {
        info!("[voice] {}", utterance.text);
        let words = utterance.text.split_whitespace().count() as u64;
        tokio::time::sleep(Duration::from_millis(words * 60_000 / WORDS_PER_MINUTE)).await;
        Ok(())
    }

    fn cancel(&self) {}

    fn name(&self) -> &str {
        "console"
    }
}
