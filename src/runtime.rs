//! Mouth events emitted to the renderer.
//!
//! This is intentionally lightweight (plain `Copy` payloads) so drivers can
//! emit from timer callbacks without allocating.

use crate::speech::SessionId;
use crate::viseme::MouthCue;
use tokio::sync::broadcast;

/// Which part of the core produced a cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueSource {
    /// Session start/end/cancel.
    Lifecycle,
    /// Engine boundary notification.
    Boundary,
    /// Fallback ticker.
    Tick,
    /// Pause detector forcing a closed mouth.
    Pause,
    /// Audio envelope estimator.
    Envelope,
}

/// A change of the displayed mouth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthEvent {
    /// Session that produced the cue.
    pub session: SessionId,
    pub cue: MouthCue,
    /// Text cursor after the change (speech sessions only).
    pub cursor: Option<usize>,
    pub source: CueSource,
}

/// Fan-out of mouth events to any number of renderers.
#[derive(Debug, Clone)]
pub struct MouthEmitter {
    tx: broadcast::Sender<MouthEvent>,
}

impl MouthEmitter {
    /// Events buffered per lagging subscriber before the oldest are dropped.
    pub const CAPACITY: usize = 256;

    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(Self::CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MouthEvent> {
        self.tx.subscribe()
    }

    /// Send an event. Having no renderer attached is not an error.
    pub fn emit(&self, event: MouthEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for MouthEmitter {
    fn default() -> Self {
        Self::new()
    }
}
