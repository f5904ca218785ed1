//! Loudness-driven lip-sync for audio without text.
//!
//! Follows the RMS level of a live or file-backed signal, smooths it with a
//! single-pole filter, and quantizes the resulting speaking level into
//! mouth shapes. Used for the microphone and for reply audio that arrives
//! without a transcript.

pub mod driver;
#[cfg(feature = "mic")]
pub mod mic;
pub mod source;

pub use driver::EnvelopeDriver;
#[cfg(feature = "mic")]
pub use mic::MicSource;
pub use source::{AudioSource, BufferSource, SourceKind, SourceStatus};

use crate::config::{EnvelopeConfig, EnvelopeMode, validate_palette};
use crate::error::Result;
use crate::viseme::{LegacyMouth, MouthCue, MouthShape, VisemeIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Compute RMS energy of audio samples in \[-1, 1\].
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// RMS of unsigned 8-bit time-domain data centred on 128.
pub fn rms_from_bytes(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples
        .iter()
        .map(|&b| {
            let v = (f32::from(b) - 128.0) / 128.0;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Maps a speaking level in \[0, 1\] to a mouth cue.
pub trait Quantizer: Send + Sync {
    fn quantize(&self, level: f32) -> MouthCue;
}

impl<F> Quantizer for F
where
    F: Fn(f32) -> MouthCue + Send + Sync,
{
    fn quantize(&self, level: f32) -> MouthCue {
        self(level)
    }
}

/// Steps evenly through an ordered palette of shapes: more energy, later entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteQuantizer {
    palette: Vec<VisemeIndex>,
}

impl PaletteQuantizer {
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`](crate::LipSyncError::Config) for an
    /// empty palette or an index outside the shape set.
    pub fn new(palette: Vec<VisemeIndex>) -> Result<Self> {
        validate_palette(&palette)?;
        Ok(Self { palette })
    }

    /// Palette position for `level`.
    pub fn slot(&self, level: f32) -> usize {
        let n = self.palette.len();
        let scaled = (level.clamp(0.0, 1.0) * n as f32).floor() as usize;
        scaled.min(n - 1)
    }
}

impl Default for PaletteQuantizer {
    fn default() -> Self {
        Self {
            palette: crate::config::default_palette(),
        }
    }
}

impl Quantizer for PaletteQuantizer {
    fn quantize(&self, level: f32) -> MouthCue {
        MouthCue::Viseme(MouthShape::from_index(self.palette[self.slot(level)]))
    }
}

/// The four named sprites.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyQuantizer;

impl Quantizer for LegacyQuantizer {
    fn quantize(&self, level: f32) -> MouthCue {
        MouthCue::Named(LegacyMouth::from_level(level))
    }
}

/// The quantizer `config.mode` asks for.
///
/// # Errors
///
/// Returns a config error if the palette is invalid.
pub fn quantizer_for(config: &EnvelopeConfig) -> Result<Arc<dyn Quantizer>> {
    Ok(match config.mode {
        EnvelopeMode::Palette => Arc::new(PaletteQuantizer::new(config.palette.clone())?),
        EnvelopeMode::Legacy => Arc::new(LegacyQuantizer),
    })
}

/// Smoothed loudness state for one audio session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioEnvelopeState {
    /// Smoothed RMS in \[0, 1\].
    pub envelope: f32,
    /// Level at the last emitted cue.
    pub last_level: f32,
    pub last_emit: Option<Instant>,
}

/// Turns per-frame RMS samples into throttled mouth cues.
pub struct EnvelopeEstimator {
    smoothing: f32,
    noise_floor: f32,
    hysteresis: f32,
    frame_budget: Duration,
    quantizer: Arc<dyn Quantizer>,
    state: AudioEnvelopeState,
}

impl EnvelopeEstimator {
    pub fn new(config: &EnvelopeConfig, quantizer: Arc<dyn Quantizer>) -> Self {
        Self {
            smoothing: config.smoothing.clamp(0.0, 1.0),
            noise_floor: config.noise_floor.clamp(0.0, 0.99),
            hysteresis: config.hysteresis.max(0.0),
            frame_budget: config.frame_budget(),
            quantizer,
            state: AudioEnvelopeState::default(),
        }
    }

    pub fn state(&self) -> AudioEnvelopeState {
        self.state
    }

    /// The cue for a closed mouth under this estimator's quantizer.
    pub fn rest_cue(&self) -> MouthCue {
        self.quantizer.quantize(0.0)
    }

    /// Fold one RMS sample into the envelope and return the speaking level.
    pub fn observe(&mut self, rms: f32) -> f32 {
        let rms = if rms.is_finite() { rms.clamp(0.0, 1.0) } else { 0.0 };
        let env = &mut self.state.envelope;
        *env += self.smoothing * (rms - *env);
        ((*env - self.noise_floor) / (1.0 - self.noise_floor)).clamp(0.0, 1.0)
    }

    /// Feed one frame's RMS. Returns a cue when both the frame budget and
    /// the hysteresis threshold allow a change.
    pub fn update(&mut self, rms: f32, now: Instant) -> Option<MouthCue> {
        let level = self.observe(rms);
        let due = self
            .state
            .last_emit
            .is_none_or(|t| now.saturating_duration_since(t) >= self.frame_budget);
        if !due || (level - self.state.last_level).abs() <= self.hysteresis {
            return None;
        }
        self.state.last_level = level;
        self.state.last_emit = Some(now);
        Some(self.quantizer.quantize(level))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn estimator(config: &EnvelopeConfig) -> EnvelopeEstimator {
        EnvelopeEstimator::new(config, quantizer_for(config).unwrap())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn rms_of_silence_and_full_scale() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 64]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
        assert!((rms(&[0.5; 10]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rms_from_bytes_is_centred_on_128() {
        assert_eq!(rms_from_bytes(&[]), 0.0);
        assert_eq!(rms_from_bytes(&[128; 32]), 0.0);
        assert!((rms_from_bytes(&[0, 0]) - 1.0).abs() < 1e-6);
        assert!((rms_from_bytes(&[192, 64]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn palette_quantizer_is_monotonic() {
        let q = PaletteQuantizer::default();
        let mut last = 0;
        for i in 0..=1000 {
            let slot = q.slot(i as f32 / 1000.0);
            assert!(slot >= last, "slot dropped at level {i}");
            last = slot;
        }
        assert_eq!(q.slot(0.0), 0);
        assert_eq!(q.slot(1.0), MouthShape::COUNT - 1);
        assert_eq!(q.quantize(0.0), MouthCue::Viseme(MouthShape::Neutral));
        assert_eq!(q.quantize(1.0), MouthCue::Viseme(MouthShape::A));
    }

    #[test]
    fn palette_quantizer_handles_odd_levels() {
        let q = PaletteQuantizer::new(vec![0, 4]).unwrap();
        assert_eq!(q.slot(-3.0), 0);
        assert_eq!(q.slot(7.0), 1);
        assert_eq!(q.slot(f32::NAN), 0);
        assert_eq!(q.quantize(0.49), MouthCue::Viseme(MouthShape::Neutral));
        assert_eq!(q.quantize(0.5), MouthCue::Viseme(MouthShape::O));
    }

    #[test]
    fn palette_quantizer_rejects_bad_palettes() {
        assert!(PaletteQuantizer::new(vec![]).is_err());
        assert!(PaletteQuantizer::new(vec![0, 11]).is_err());
    }

    #[test]
    fn closures_are_quantizers() {
        let config = EnvelopeConfig::default();
        let q: Arc<dyn Quantizer> = Arc::new(|level: f32| {
            if level > 0.5 {
                MouthCue::Viseme(MouthShape::O)
            } else {
                MouthCue::Viseme(MouthShape::MBP)
            }
        });
        let mut e = EnvelopeEstimator::new(&config, q);
        assert_eq!(e.rest_cue(), MouthCue::Viseme(MouthShape::MBP));
        let t0 = Instant::now();
        let mut cue = None;
        for i in 0..40 {
            cue = e.update(1.0, t0 + ms(100 * i)).or(cue);
        }
        assert_eq!(cue, Some(MouthCue::Viseme(MouthShape::O)));
    }

    #[test]
    fn silence_emits_nothing() {
        let mut e = estimator(&EnvelopeConfig::default());
        let t0 = Instant::now();
        for i in 0..50 {
            assert_eq!(e.update(0.01, t0 + ms(16 * i)), None);
        }
        assert_eq!(e.state().last_emit, None);
    }

    #[test]
    fn smoothing_follows_exponential_filter() {
        let mut e = estimator(&EnvelopeConfig::default());
        e.observe(1.0);
        assert!((e.state().envelope - 0.2).abs() < 1e-6);
        e.observe(1.0);
        assert!((e.state().envelope - 0.36).abs() < 1e-6);
    }

    #[test]
    fn noise_floor_is_subtracted() {
        let config = EnvelopeConfig {
            smoothing: 1.0,
            ..EnvelopeConfig::default()
        };
        let mut e = estimator(&config);
        assert_eq!(e.observe(0.03), 0.0);
        assert!((e.observe(1.0) - 1.0).abs() < 1e-6);
        let mid = e.observe(0.515);
        assert!((mid - 0.5).abs() < 1e-3);
    }

    #[test]
    fn updates_are_throttled_to_fps() {
        let config = EnvelopeConfig {
            smoothing: 1.0,
            ..EnvelopeConfig::default()
        };
        let mut e = estimator(&config);
        let t0 = Instant::now();
        assert!(e.update(0.5, t0).is_some());
        // Large jump, but inside the 83ms frame budget.
        assert_eq!(e.update(1.0, t0 + ms(40)), None);
        assert!(e.update(1.0, t0 + ms(84)).is_some());
    }

    #[test]
    fn small_changes_are_held() {
        let config = EnvelopeConfig {
            smoothing: 1.0,
            ..EnvelopeConfig::default()
        };
        let mut e = estimator(&config);
        let t0 = Instant::now();
        assert!(e.update(0.5, t0).is_some());
        let level = e.state().last_level;
        assert_eq!(e.update(0.52, t0 + ms(200)), None);
        assert_eq!(e.state().last_level, level);
        assert!(e.update(0.6, t0 + ms(400)).is_some());
    }

    #[test]
    fn legacy_mode_emits_named_sprites() {
        let config = EnvelopeConfig {
            smoothing: 1.0,
            mode: EnvelopeMode::Legacy,
            ..EnvelopeConfig::default()
        };
        let mut e = estimator(&config);
        let t0 = Instant::now();
        assert_eq!(
            e.update(1.0, t0),
            Some(MouthCue::Named(LegacyMouth::Wide))
        );
        assert_eq!(e.rest_cue(), MouthCue::Named(LegacyMouth::Closed));
    }

    #[test]
    fn non_finite_rms_is_treated_as_silence() {
        let mut e = estimator(&EnvelopeConfig::default());
        assert_eq!(e.observe(f32::NAN), 0.0);
        assert_eq!(e.observe(f32::INFINITY), 0.0);
        assert_eq!(e.state().envelope, 0.0);
    }
}
