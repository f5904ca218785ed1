//! Configuration types for the lip-sync drivers.
//!
//! Every tuning constant of the timing heuristics lives here so hosts can
//! adjust them per avatar without touching the drivers.

use crate::error::{LipSyncError, Result};
use crate::viseme::MouthShape;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for an avatar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Speech-driven (text) timing settings.
    pub speech: SpeechTimingConfig,
    /// Audio envelope estimator settings.
    pub envelope: EnvelopeConfig,
    /// Utterance defaults passed to the speech engine.
    pub voice: VoiceConfig,
}

/// Timing for the boundary controller and the fallback ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechTimingConfig {
    /// Boundary notifications closer than this to the last accepted one are dropped.
    pub boundary_min_interval_ms: u64,
    /// Fallback ticker period.
    ///
    /// Typical range: 90–100 ms. Shorter periods make the mouth run ahead
    /// of slow voices when the engine reports no boundaries.
    pub tick_interval_ms: u64,
    /// How often the pause detector looks at the progress timestamp.
    pub pause_check_interval_ms: u64,
    /// Time without progress after which the mouth is forced closed.
    pub pause_threshold_ms: u64,
    /// Extra ticks a vowel shape is held before the ticker advances.
    pub vowel_hold_ticks: u32,
}

impl Default for SpeechTimingConfig {
    fn default() -> Self {
        Self {
            boundary_min_interval_ms: 30,
            tick_interval_ms: 95,
            pause_check_interval_ms: 60,
            pause_threshold_ms: 260,
            vowel_hold_ticks: 1,
        }
    }
}

impl SpeechTimingConfig {
    pub fn boundary_min_interval(&self) -> Duration {
        Duration::from_millis(self.boundary_min_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn pause_check_interval(&self) -> Duration {
        Duration::from_millis(self.pause_check_interval_ms)
    }

    pub fn pause_threshold(&self) -> Duration {
        Duration::from_millis(self.pause_threshold_ms)
    }
}

/// Which quantizer the envelope driver uses by default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeMode {
    /// Quantize across `palette` into viseme shapes.
    #[default]
    Palette,
    /// Four named sprites (closed / small / medium / wide).
    Legacy,
}

/// Audio envelope estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Maximum shape changes per second.
    pub fps: u32,
    /// Single-pole smoothing factor in \[0, 1\]; higher follows the signal faster.
    pub smoothing: f32,
    /// Minimum level change required before a new shape is emitted.
    pub hysteresis: f32,
    /// RMS value treated as silence.
    ///
    /// 0.03 is typical for a quiet room on a laptop microphone.
    pub noise_floor: f32,
    /// Period of the frame loop reading the audio source (render cadence).
    pub frame_interval_ms: u64,
    /// Number of time-domain samples analysed per frame.
    pub window_size: usize,
    /// Shape indices from closed to widest opening.
    pub palette: Vec<usize>,
    /// Default quantizer.
    pub mode: EnvelopeMode,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            fps: 12,
            smoothing: 0.2,
            hysteresis: 0.04,
            noise_floor: 0.03,
            frame_interval_ms: 16,
            window_size: 1024,
            palette: default_palette(),
            mode: EnvelopeMode::Palette,
        }
    }
}

impl EnvelopeConfig {
    /// Minimum time between two emitted shapes.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Palette ordered by mouth opening: more energy → later entries.
pub fn default_palette() -> Vec<usize> {
    [
        MouthShape::Neutral,
        MouthShape::MBP,
        MouthShape::FV,
        MouthShape::TDN,
        MouthShape::SZ,
        MouthShape::U,
        MouthShape::R,
        MouthShape::I,
        MouthShape::E,
        MouthShape::O,
        MouthShape::A,
    ]
    .iter()
    .map(|s| s.index())
    .collect()
}

/// Defaults for utterances handed to the speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// BCP-47 language tag.
    pub lang: String,
    /// Engine speaking rate (1.0 = normal).
    pub rate: f32,
    /// Pace of the built-in paced engine at rate 1.0.
    pub words_per_minute: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            lang: "en-US".to_owned(),
            rate: 1.0,
            words_per_minute: 165.0,
        }
    }
}

impl LipSyncConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| LipSyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LipSyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/avatar-lipsync/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("avatar-lipsync")
            .join("config.toml")
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let s = &self.speech;
        if s.tick_interval_ms == 0 || s.pause_check_interval_ms == 0 {
            return Err(LipSyncError::Config(
                "speech timer intervals must be non-zero".into(),
            ));
        }
        let e = &self.envelope;
        if !(0.0..=1.0).contains(&e.smoothing) {
            return Err(LipSyncError::Config(format!(
                "envelope.smoothing must be within [0, 1], got {}",
                e.smoothing
            )));
        }
        if !(0.0..1.0).contains(&e.noise_floor) {
            return Err(LipSyncError::Config(format!(
                "envelope.noise_floor must be within [0, 1), got {}",
                e.noise_floor
            )));
        }
        if e.hysteresis < 0.0 {
            return Err(LipSyncError::Config("envelope.hysteresis must be >= 0".into()));
        }
        if e.window_size == 0 {
            return Err(LipSyncError::Config("envelope.window_size must be > 0".into()));
        }
        validate_palette(&e.palette)?;
        if self.voice.rate <= 0.0 || self.voice.words_per_minute <= 0.0 {
            return Err(LipSyncError::Config(
                "voice.rate and voice.words_per_minute must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A palette must be non-empty and only reference existing shapes.
pub(crate) fn validate_palette(palette: &[usize]) -> Result<()> {
    if palette.is_empty() {
        return Err(LipSyncError::Config("envelope.palette is empty".into()));
    }
    if let Some(bad) = palette.iter().find(|&&i| i >= MouthShape::COUNT) {
        return Err(LipSyncError::Config(format!(
            "envelope.palette index {bad} out of range (0..{})",
            MouthShape::COUNT
        )));
    }
    Ok(())
}
