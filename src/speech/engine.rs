//! The speech-synthesis capability the text driver talks to.
//!
//! Real engines (browser speech synthesis, platform voices, a TTS server)
//! implement [`SpeechEngine`] in the host. [`PacedEngine`] is a clock-driven
//! stand-in that "speaks" at a fixed words-per-minute pace.

use crate::error::{LipSyncError, Result};
use crate::viseme::is_pause_char;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One utterance handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRequest {
    pub text: String,
    /// BCP-47 language tag.
    pub lang: String,
    /// Speaking rate, 1.0 = normal.
    pub rate: f32,
}

/// Lifecycle and progress notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Start,
    /// Speech reached this char offset into the utterance text.
    Boundary { char_index: usize },
    End,
    Error(String),
}

/// A speech-synthesis capability.
///
/// `begin` must not block: it queues the utterance and reports progress
/// through `events` until `End` or `Error`. Dropping the receiver means
/// the core no longer cares about this utterance.
pub trait SpeechEngine: Send + Sync {
    /// Whether the engine can speak at all on this host.
    fn is_available(&self) -> bool {
        true
    }

    /// Start speaking `request`.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Engine`] if the utterance cannot be queued.
    fn begin(
        &self,
        request: UtteranceRequest,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<()>;

    /// Stop the in-flight utterance, if any. Must be idempotent.
    fn cancel(&self);
}

/// Estimate how long `text` takes to say, in milliseconds.
pub fn estimate_duration(text: &str, words_per_minute: f32) -> f32 {
    let word_count = text.split_whitespace().count() as f32;
    let minutes = word_count / words_per_minute.max(30.0);
    minutes * 60.0 * 1000.0
}

/// Char offsets where each word starts.
pub fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (i, c) in text.chars().enumerate() {
        let pause = is_pause_char(c);
        if !pause && !in_word {
            starts.push(i);
        }
        in_word = !pause;
    }
    starts
}

/// Clock-driven engine: one boundary per word at a steady pace.
#[derive(Debug)]
pub struct PacedEngine {
    words_per_minute: f32,
    boundaries: bool,
    active: Mutex<Option<CancellationToken>>,
}

impl PacedEngine {
    pub fn new(words_per_minute: f32) -> Self {
        Self {
            words_per_minute,
            boundaries: true,
            active: Mutex::new(None),
        }
    }

    /// Disable boundary reports, like voices that only signal start and end.
    pub fn with_boundaries(mut self, enabled: bool) -> Self {
        self.boundaries = enabled;
        self
    }

    /// Time spent on each word at `rate`.
    pub fn word_duration(&self, rate: f32) -> Duration {
        let wpm = (self.words_per_minute * rate.max(0.1)).max(1.0);
        Duration::from_secs_f32(60.0 / wpm)
    }

    fn replace_active(&self, token: Option<CancellationToken>) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(prev) = std::mem::replace(&mut *active, token) {
            prev.cancel();
        }
    }
}

impl SpeechEngine for PacedEngine {
    fn begin(
        &self,
        request: UtteranceRequest,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LipSyncError::Engine(format!("no async runtime: {e}")))?;

        let cancel = CancellationToken::new();
        self.replace_active(Some(cancel.clone()));

        let starts = word_starts(&request.text);
        let per_word = self.word_duration(request.rate);
        let boundaries = self.boundaries;
        debug!(
            words = starts.len(),
            per_word_ms = per_word.as_millis() as u64,
            lang = %request.lang,
            "paced utterance queued"
        );

        handle.spawn(async move {
            if events.send(EngineEvent::Start).is_err() {
                return;
            }
            for char_index in starts {
                if boundaries && events.send(EngineEvent::Boundary { char_index }).is_err() {
                    return;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(per_word) => {}
                }
            }
            let _ = events.send(EngineEvent::End);
        });
        Ok(())
    }

    fn cancel(&self) {
        self.replace_active(None);
    }
}
