use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

use crate::models::FacingMode;

const DEFAULT_CONFIG_FILE: &str = "guardian.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardianSettings {
    /// Base URL of the reasoning service, without the `/api/v1` suffix.
    pub service_url: String,
    pub frame_interval_ms: u64,
    pub frame_timeout_ms: u64,
    pub audio_timeout_ms: u64,
    pub jpeg_quality: u8,
    pub max_frame_width: u32,
    /// Decoded frames a video track must report before it is grabbed.
    pub min_ready_frames: u64,
    /// Hamming distance under which a frame counts as unchanged.
    pub unchanged_threshold: u32,
    /// Unchanged frames are still submitted once this much time has passed.
    pub max_frame_staleness_ms: u64,
    pub facing_mode: FacingMode,
    pub audio_sample_rate: u32,
    pub min_clip_ms: u64,
    pub max_clip_ms: u64,
    pub voice_enabled: bool,
    pub demo_frame_path: Option<PathBuf>,
    pub debug: bool,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8000".into(),
            frame_interval_ms: 3_000,
            frame_timeout_ms: 30_000,
            audio_timeout_ms: 15_000,
            jpeg_quality: 80,
            max_frame_width: 1280,
            min_ready_frames: 2,
            unchanged_threshold: 4,
            max_frame_staleness_ms: 15_000,
            facing_mode: FacingMode::Environment,
            audio_sample_rate: 16_000,
            min_clip_ms: 300,
            max_clip_ms: 60_000,
            voice_enabled: true,
            demo_frame_path: None,
            debug: false,
        }
    }
}

impl GuardianSettings {
    pub fn validate(&self) -> Result<()> {
        if self.service_url.trim().is_empty() {
            bail!("service_url must not be empty");
        }
        if self.frame_interval_ms == 0 {
            bail!("frame_interval_ms must be greater than zero");
        }
        if self.frame_timeout_ms == 0 || self.audio_timeout_ms == 0 {
            bail!("dispatch timeouts must be greater than zero");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg_quality must be within 1..=100, got {}", self.jpeg_quality);
        }
        if self.max_frame_width == 0 || self.max_frame_width > 4096 {
            bail!("max_frame_width must be within 1..=4096");
        }
        if !(8_000..=96_000).contains(&self.audio_sample_rate) {
            bail!("audio_sample_rate must be within 8000..=96000");
        }
        if self.min_clip_ms == 0 || self.min_clip_ms > self.max_clip_ms || self.max_clip_ms > 60_000 {
            bail!("clip bounds must satisfy 0 < min_clip_ms <= max_clip_ms <= 60000");
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn audio_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_timeout_ms)
    }

    pub fn max_frame_staleness(&self) -> Duration {
        Duration::from_millis(self.max_frame_staleness_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("GUARDIAN_SERVICE_URL") {
            if !url.trim().is_empty() {
                self.service_url = url;
            }
        }
        if let Ok(value) = env::var("GUARDIAN_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(path) = env::var("GUARDIAN_FRAME") {
            self.demo_frame_path = Some(PathBuf::from(path));
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<GuardianSettings>,
    load_warning: Option<String>,
}

impl SettingsStore {
    /// Loads from `GUARDIAN_CONFIG`, falling back to `guardian.json`.
    pub fn load() -> Result<Self> {
        let path = env::var("GUARDIAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::new(path)
    }

    pub fn new(path: PathBuf) -> Result<Self> {
        let mut load_warning = None;
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                load_warning = Some(format!(
                    "Ignoring malformed settings in {}: {err}",
                    path.display()
                ));
                GuardianSettings::default()
            })
        } else {
            GuardianSettings::default()
        };

        data.apply_env_overrides();
        data.validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        Ok(Self {
            path,
            data: RwLock::new(data),
            load_warning,
        })
    }

    /// Set when the file existed but could not be parsed and defaults were
    /// used instead. Loading happens before logging is up, so the caller
    /// reports it.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn settings(&self) -> GuardianSettings {
        self.data.read().clone()
    }

    pub fn update(&self, settings: GuardianSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.data.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &GuardianSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
