//! Host-facing entry point.
//!
//! An [`Avatar`] runs at most one lip-sync mode at a time: either a speech
//! session or an audio-envelope session. Starting one stops the other.

use crate::config::LipSyncConfig;
use crate::envelope::{AudioSource, EnvelopeDriver, Quantizer, quantizer_for};
use crate::error::{LipSyncError, Result};
use crate::runtime::{MouthEmitter, MouthEvent};
use crate::speech::{SessionId, SpeechDriver, SpeechEngine};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// What the mouth is currently following.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarMode {
    Idle,
    Speaking,
    Following,
}

/// Lip-sync core for one avatar widget.
pub struct Avatar {
    config: LipSyncConfig,
    emitter: MouthEmitter,
    speech: SpeechDriver,
    envelope: Option<EnvelopeDriver>,
}

impl Avatar {
    /// Create an avatar. `engine` is `None` on hosts without speech synthesis;
    /// [`speak`](Self::speak) is refused there but audio following works.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn new(config: LipSyncConfig, engine: Option<Arc<dyn SpeechEngine>>) -> Result<Self> {
        config.validate()?;
        let emitter = MouthEmitter::new();
        let speech = SpeechDriver::new(
            engine,
            config.speech.clone(),
            config.voice.clone(),
            emitter.clone(),
        );
        info!(speech = speech.can_speak(), "avatar created");
        Ok(Self {
            config,
            emitter,
            speech,
            envelope: None,
        })
    }

    pub fn config(&self) -> &LipSyncConfig {
        &self.config
    }

    /// Subscribe to mouth cues from every session this avatar runs.
    pub fn subscribe(&self) -> broadcast::Receiver<MouthEvent> {
        self.emitter.subscribe()
    }

    pub fn can_speak(&self) -> bool {
        self.speech.can_speak()
    }

    pub fn mode(&self) -> AvatarMode {
        if self.speech.is_active() {
            AvatarMode::Speaking
        } else if self.envelope.as_ref().is_some_and(EnvelopeDriver::is_running) {
            AvatarMode::Following
        } else {
            AvatarMode::Idle
        }
    }

    /// Speak `text` in the configured language.
    ///
    /// # Errors
    ///
    /// See [`SpeechDriver::speak`].
    pub async fn speak(&mut self, text: &str) -> Result<SessionId> {
        self.speak_in(text, None).await
    }

    /// Speak `text`, overriding the language tag when `lang` is set.
    ///
    /// # Errors
    ///
    /// See [`SpeechDriver::speak`]. A refused utterance leaves any running
    /// audio session alone.
    pub async fn speak_in(&mut self, text: &str, lang: Option<&str>) -> Result<SessionId> {
        if !self.speech.can_speak() {
            return Err(LipSyncError::SpeechUnavailable);
        }
        self.stop_envelope().await;
        self.speech.speak(text, lang).await
    }

    /// Follow the loudness of `source` with the configured quantizer.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::AudioSourceMissing`] without a source.
    pub async fn follow_audio(&mut self, source: Option<Box<dyn AudioSource>>) -> Result<SessionId> {
        let quantizer = quantizer_for(&self.config.envelope)?;
        self.follow_audio_with(source, quantizer).await
    }

    /// Follow the loudness of `source` with a caller-supplied quantizer.
    ///
    /// # Errors
    ///
    /// As [`follow_audio`](Self::follow_audio).
    pub async fn follow_audio_with(
        &mut self,
        source: Option<Box<dyn AudioSource>>,
        quantizer: Arc<dyn Quantizer>,
    ) -> Result<SessionId> {
        self.speech.cancel().await;
        self.stop_envelope().await;
        let driver = EnvelopeDriver::start(
            source,
            &self.config.envelope,
            quantizer,
            self.emitter.clone(),
        )?;
        let id = driver.session();
        self.envelope = Some(driver);
        Ok(id)
    }

    /// Stop whatever is running and close the mouth. Idempotent.
    pub async fn stop(&mut self) {
        self.speech.cancel().await;
        self.stop_envelope().await;
    }

    async fn stop_envelope(&mut self) {
        if let Some(driver) = self.envelope.take() {
            driver.stop().await;
        }
    }
}

impl Drop for Avatar {
    fn drop(&mut self) {
        debug!(mode = ?self.mode(), "avatar dropped");
    }
}
