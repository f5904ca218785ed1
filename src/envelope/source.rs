//! Audio sources the envelope driver can follow.

use crate::error::{LipSyncError, Result};
use std::path::Path;
use tokio::time::Instant;
use tracing::info;

/// Where the samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Live capture; never routed to the speakers.
    Microphone,
    /// A playing media element owned by the host.
    Element,
    /// Decoded samples played by the core itself.
    Buffer,
}

/// Result of reading one analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Connected,
    /// The source is gone; the driver stops.
    Disconnected,
}

/// Time-domain sample provider (an analyser tap).
pub trait AudioSource: Send {
    fn kind(&self) -> SourceKind;

    /// Fill `out` with the most recent samples in \[-1, 1\].
    fn read_time_domain(&mut self, out: &mut [f32]) -> SourceStatus;
}

/// Plays an in-memory mono buffer in real time, from the first read.
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Vec<f32>,
    sample_rate: u32,
    kind: SourceKind,
    started: Option<Instant>,
}

impl BufferSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
            kind: SourceKind::Buffer,
            started: None,
        }
    }

    /// Report a different kind (e.g. `Element` for host-decoded media).
    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Decode a WAV file, averaging channels to mono.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Audio`] if the file cannot be opened or decoded.
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| LipSyncError::Audio(format!("cannot open {}: {e}", path.display())))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
            }
        }
        .map_err(|e| LipSyncError::Audio(format!("cannot decode {}: {e}", path.display())))?;

        let samples = to_mono(&interleaved, spec.channels);
        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            seconds = samples.len() as f32 / spec.sample_rate.max(1) as f32,
            "wav source loaded"
        );
        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

impl AudioSource for BufferSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn read_time_domain(&mut self, out: &mut [f32]) -> SourceStatus {
        let started = *self.started.get_or_insert_with(Instant::now);
        let head = (started.elapsed().as_secs_f64() * f64::from(self.sample_rate)) as usize;
        if head >= self.samples.len() {
            out.fill(0.0);
            return SourceStatus::Disconnected;
        }

        let begin = head.saturating_sub(out.len());
        let window = &self.samples[begin..head];
        let pad = out.len() - window.len();
        out[..pad].fill(0.0);
        out[pad..].copy_from_slice(window);
        SourceStatus::Connected
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub(crate) fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    #[test]
    fn to_mono_averages_channels() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_source_plays_then_disconnects() {
        // 1 second at 1 kHz.
        let mut source = BufferSource::new(vec![0.5; 1000], 1000);
        let mut window = vec![1.0; 100];

        assert_eq!(source.read_time_domain(&mut window), SourceStatus::Connected);
        assert!(window.iter().all(|&s| s == 0.0));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(source.read_time_domain(&mut window), SourceStatus::Connected);
        assert!(window.iter().all(|&s| s == 0.5));

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(
            source.read_time_domain(&mut window),
            SourceStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn short_history_is_zero_padded() {
        let mut source = BufferSource::new(vec![1.0; 1000], 1000);
        let mut window = vec![9.0; 100];
        source.read_time_domain(&mut window);
        tokio::time::advance(Duration::from_millis(40)).await;
        source.read_time_domain(&mut window);
        assert!(window[..60].iter().all(|&s| s == 0.0));
        assert!(window[60..].iter().all(|&s| s == 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_disconnects_immediately() {
        let mut source = BufferSource::new(Vec::new(), 16_000);
        let mut window = vec![0.0; 8];
        assert_eq!(
            source.read_time_domain(&mut window),
            SourceStatus::Disconnected
        );
    }

    #[test]
    fn from_wav_decodes_and_downmixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let source = BufferSource::from_wav(&path).unwrap();
        assert_eq!(source.sample_rate(), 8_000);
        assert!((source.duration_secs() - 0.1).abs() < 1e-3);
        assert_eq!(source.kind(), SourceKind::Buffer);
        assert!((source.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn from_wav_missing_file_is_audio_error() {
        let err = BufferSource::from_wav(Path::new("/nonexistent/reply.wav")).unwrap_err();
        assert!(matches!(err, LipSyncError::Audio(_)));
    }
}
