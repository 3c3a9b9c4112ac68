use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::VoiceError;
use crate::instructions::Guidance;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUtterance {
    pub id: Uuid,
    pub text: String,
    pub requested_at: DateTime<Utc>,
}

impl VoiceUtterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum VoiceState {
    #[default]
    Idle,
    Speaking { utterance: VoiceUtterance },
}

/// Platform text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `utterance`, resolving when playback finishes.
    async fn speak(&self, utterance: &VoiceUtterance) -> Result<(), VoiceError>;

    /// Silence whatever is playing. Must be safe to call when idle.
    fn cancel(&self);

    fn name(&self) -> &str;
}

struct Playback {
    id: Uuid,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Playback {
    fn halt(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// Single audible output. A new utterance always cancels the one playing.
pub struct VoiceGuidanceSynchronizer {
    synth: Arc<dyn SpeechSynthesizer>,
    enabled: AtomicBool,
    current: Mutex<Option<Playback>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<VoiceState>,
}

impl VoiceGuidanceSynchronizer {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, enabled: bool) -> Arc<Self> {
        let (state_tx, _) = watch::channel(VoiceState::Idle);
        info!("voice output via {} ({})", synth.name(), if enabled { "on" } else { "muted" });
        Arc::new(Self {
            synth,
            enabled: AtomicBool::new(enabled),
            current: Mutex::new(None),
            listener: Mutex::new(None),
            state_tx,
        })
    }

    /// Speak `text`, superseding anything in progress. Returns the utterance id
    /// or `None` when muted or the text is blank.
    pub fn speak(self: &Arc<Self>, text: impl Into<String>) -> Option<Uuid> {
        let text = text.into();
        if !self.enabled.load(Ordering::SeqCst) {
            debug!("voice muted, dropping: {text}");
            return None;
        }
        if text.trim().is_empty() {
            return None;
        }

        let utterance = VoiceUtterance::new(text);
        let id = utterance.id;
        let token = CancellationToken::new();

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            debug!("utterance {} superseded by {id}", previous.id);
            previous.halt();
            self.synth.cancel();
        }

        self.state_tx.send_replace(VoiceState::Speaking {
            utterance: utterance.clone(),
        });

        let handle = tokio::spawn({
            let this = Arc::downgrade(self);
            let token = token.clone();
            async move {
                let Some(synth) = this.upgrade().map(|this| Arc::clone(&this.synth)) else {
                    return;
                };
                tokio::select! {
                    _ = token.cancelled() => return,
                    result = synth.speak(&utterance) => {
                        if let Err(err) = result {
                            warn!("speech synthesis failed: {err}");
                        }
                    }
                }
                if let Some(this) = this.upgrade() {
                    this.finished(utterance.id);
                }
            }
        });

        *current = Some(Playback { id, token, handle });
        Some(id)
    }

    /// Silence output and go idle.
    pub fn stop(&self) {
        let previous = self.current.lock().take();
        if let Some(playback) = previous {
            playback.halt();
            self.synth.cancel();
        }
        self.state_tx.send_replace(VoiceState::Idle);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> VoiceState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state_tx.subscribe()
    }

    /// Speak everything published on `spoken` from now on. Replaces any
    /// previous listener.
    pub fn follow(self: &Arc<Self>, mut spoken: watch::Receiver<Guidance>) {
        spoken.borrow_and_update();
        let this: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while spoken.changed().await.is_ok() {
                let text = spoken.borrow_and_update().text.clone();
                let Some(voice) = this.upgrade() else {
                    break;
                };
                voice.speak(text);
            }
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    fn finished(&self, id: Uuid) {
        let mut current = self.current.lock();
        if current.as_ref().map(|playback| playback.id) == Some(id) {
            *current = None;
            self.state_tx.send_replace(VoiceState::Idle);
        }
    }
}

impl Drop for VoiceGuidanceSynchronizer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
        if let Some(playback) = self.current.get_mut().take() {
            playback.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::instructions::InstructionStateMachine;
    use crate::testing::{instruction_list, RecordingSynthesizer};

    #[tokio::test(start_paused = true)]
    async fn new_utterance_cancels_the_playing_one() {
        let synth = Arc::new(RecordingSynthesizer::new(Duration::from_secs(2)));
        let voice = VoiceGuidanceSynchronizer::new(synth.clone(), true);

        voice.speak("first");
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        voice.speak("second");
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(synth.started(), vec!["first", "second"]);
        assert_eq!(synth.completed(), vec!["second"]);
        assert!(synth.cancel_count() >= 1);
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_swallowed_and_muting_drops_text() {
        let synth = Arc::new(RecordingSynthesizer::new(Duration::from_millis(10)));
        synth.fail_with(VoiceError::Unavailable("no voices installed".into()));
        let voice = VoiceGuidanceSynchronizer::new(synth.clone(), true);

        assert!(voice.speak("hello").is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(voice.state(), VoiceState::Idle);

        voice.set_enabled(false);
        assert!(voice.speak("ignored").is_none());
        assert!(voice.speak("   ").is_none());
        assert_eq!(synth.started(), vec!["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn follows_instruction_advances() {
        let synth = Arc::new(RecordingSynthesizer::new(Duration::from_millis(10)));
        let voice = VoiceGuidanceSynchronizer::new(synth.clone(), true);
        let instructions = InstructionStateMachine::new();
        voice.follow(instructions.subscribe_spoken());

        instructions.set_instructions(instruction_list(&["one", "two"]));
        instructions.advance();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(synth.completed(), vec!["say two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_output() {
        let synth = Arc::new(RecordingSynthesizer::new(Duration::from_secs(5)));
        let voice = VoiceGuidanceSynchronizer::new(synth.clone(), true);
        voice.speak("long instruction");
        tokio::task::yield_now().await;

        voice.stop();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(synth.completed().is_empty());
        assert_eq!(voice.state(), VoiceState::Idle);
    }
}
