//! Step-by-step guidance: the ordered instruction list, the current step and
//! the spoken-text channel the voice synchronizer listens to.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{InstructionList, InstructionStep};

/// Text queued for speech. `seq` increases with every publish so repeated
/// identical text is still observed as new.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to this step.
    Advanced(InstructionStep),
    /// The last step was confirmed; the list is complete.
    Completed,
    /// Nothing to advance: the list is empty or already complete.
    Rejected,
}

/// Observer view of the instruction state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionProgress {
    /// 1-based pointer; 0 when there are no steps.
    pub current_step: usize,
    pub total_steps: usize,
    pub complete: bool,
    pub current: Option<InstructionStep>,
}

#[derive(Default)]
struct InstructionState {
    list: InstructionList,
    pointer: usize,
    finished: bool,
    spoken_seq: u64,
}

impl InstructionState {
    fn progress(&self) -> InstructionProgress {
        InstructionProgress {
            current_step: self.pointer,
            total_steps: self.list.len(),
            complete: self.finished,
            current: self.list.step(self.pointer).cloned(),
        }
    }

    fn replace(&mut self, list: InstructionList) {
        self.pointer = if list.is_empty() { 0 } else { 1 };
        self.finished = false;
        self.list = list;
    }
}

pub struct InstructionStateMachine {
    state: Mutex<InstructionState>,
    progress_tx: watch::Sender<InstructionProgress>,
    spoken_tx: watch::Sender<Guidance>,
}

impl InstructionStateMachine {
    pub fn new() -> Self {
        let (progress_tx, _) = watch::channel(InstructionProgress::default());
        let (spoken_tx, _) = watch::channel(Guidance::default());
        Self {
            state: Mutex::new(InstructionState::default()),
            progress_tx,
            spoken_tx,
        }
    }

    /// Replace the list wholesale and point at its first step.
    pub fn set_instructions(&self, list: InstructionList) -> InstructionProgress {
        let mut state = self.state.lock();
        state.replace(list);
        self.publish(&state)
    }

    /// Replace the list only when it differs from the current one, so a
    /// repeated analysis does not reset progress. Returns whether it replaced.
    pub fn replace_if_changed(&self, list: InstructionList) -> bool {
        let mut state = self.state.lock();
        if state.list == list {
            return false;
        }
        state.replace(list);
        self.publish(&state);
        true
    }

    pub fn advance(&self) -> Advance {
        let mut state = self.state.lock();
        if state.finished || state.list.is_empty() {
            return Advance::Rejected;
        }

        if state.pointer < state.list.len() {
            state.pointer += 1;
            let Some(step) = state.list.step(state.pointer).cloned() else {
                return Advance::Rejected;
            };
            self.publish(&state);
            let text = step.spoken_text.clone();
            self.speak_locked(&mut state, text);
            Advance::Advanced(step)
        } else {
            state.finished = true;
            self.publish(&state);
            Advance::Completed
        }
    }

    pub fn current(&self) -> Option<InstructionStep> {
        let state = self.state.lock();
        state.list.step(state.pointer).cloned()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().finished
    }

    pub fn progress(&self) -> InstructionProgress {
        self.state.lock().progress()
    }

    /// Publish composed guidance on the spoken channel.
    pub fn announce(&self, text: impl Into<String>) {
        let mut state = self.state.lock();
        self.speak_locked(&mut state, text.into());
    }

    pub fn reset(&self) {
        self.set_instructions(InstructionList::empty());
    }

    pub fn subscribe(&self) -> watch::Receiver<InstructionProgress> {
        self.progress_tx.subscribe()
    }

    pub fn subscribe_spoken(&self) -> watch::Receiver<Guidance> {
        self.spoken_tx.subscribe()
    }

    fn publish(&self, state: &InstructionState) -> InstructionProgress {
        let progress = state.progress();
        self.progress_tx.send_replace(progress.clone());
        progress
    }

    fn speak_locked(&self, state: &mut InstructionState, text: String) {
        if text.trim().is_empty() {
            return;
        }
        state.spoken_seq += 1;
        self.spoken_tx.send_replace(Guidance {
            seq: state.spoken_seq,
            text,
        });
    }
}

impl Default for InstructionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
