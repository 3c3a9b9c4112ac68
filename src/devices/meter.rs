use serde::Serialize;

/// Level reported for silence or an empty buffer.
pub const FLOOR_DB: f32 = -120.0;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevels {
    /// Linear RMS in 0.0..=1.0.
    pub level: f32,
    pub peak: f32,
    pub rms_db: f32,
    pub peak_db: f32,
}

impl Default for AudioLevels {
    fn default() -> Self {
        Self {
            level: 0.0,
            peak: 0.0,
            rms_db: FLOOR_DB,
            peak_db: FLOOR_DB,
        }
    }
}

impl AudioLevels {
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let level = energy.sqrt().min(1.0);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max).min(1.0);

        Self {
            level,
            peak,
            rms_db: to_db(level),
            peak_db: to_db(peak),
        }
    }
}

#[inline]
fn to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return FLOOR_DB;
    }
    (20.0 * linear.log10()).max(FLOOR_DB)
}
