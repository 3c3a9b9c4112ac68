use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstructionStep {
    /// 1-based, always equal to the step's position in its list.
    pub step_number: u32,
    pub display_text: String,
    pub spoken_text: String,
    pub duration_secs: Option<u32>,
    pub warning: Option<String>,
    pub visual_cue: Option<String>,
    pub requires_confirmation: bool,
}

/// Ordered, immutable list of steps.
///
/// Construction sorts by the incoming step number and renumbers from 1 so
/// that numbering always matches position.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstructionList {
    steps: Vec<InstructionStep>,
}

impl InstructionList {
    pub fn new(mut steps: Vec<InstructionStep>) -> Self {
        steps.sort_by_key(|step| step.step_number);

        let mut renumbered = false;
        for (index, step) in steps.iter_mut().enumerate() {
            let expected = index as u32 + 1;
            if step.step_number != expected {
                step.step_number = expected;
                renumbered = true;
            }
        }
        if renumbered {
            log::warn!("instruction steps were not contiguous; renumbered {} steps", steps.len());
        }

        Self { steps }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step by 1-based number.
    pub fn step(&self, number: usize) -> Option<&InstructionStep> {
        number.checked_sub(1).and_then(|index| self.steps.get(index))
    }

    pub fn steps(&self) -> &[InstructionStep] {
        &self.steps
    }
}
