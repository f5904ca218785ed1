//! The state of one spoken utterance.

use crate::viseme::MouthShape;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one speech or audio session on the emitted event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh, process-unique id. Later sessions get larger ids.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One active utterance, shared by the boundary controller and the fallback ticker.
///
/// The cursor only ever moves forward through [`advance_to_at_least`](Self::advance_to_at_least),
/// whichever driver is writing.
#[derive(Debug)]
pub struct SpeechSession {
    id: SessionId,
    text: Vec<char>,
    lang: String,
    rate: f32,
    cursor: usize,
    pub(crate) hold: u32,
    shape: MouthShape,
    pub(crate) last_boundary: Option<Instant>,
    pub(crate) last_progress: Option<Instant>,
}

impl SpeechSession {
    pub fn new(text: &str, lang: impl Into<String>, rate: f32) -> Self {
        Self {
            id: SessionId::next(),
            text: text.chars().collect(),
            lang: lang.into(),
            rate,
            cursor: 0,
            hold: 0,
            shape: MouthShape::Neutral,
            last_boundary: None,
            last_progress: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn text(&self) -> &[char] {
        &self.text
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn hold(&self) -> u32 {
        self.hold
    }

    /// Currently displayed shape.
    pub fn shape(&self) -> MouthShape {
        self.shape
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.text.len()
    }

    /// Move the cursor to `pos` unless it is already further along.
    ///
    /// Clamped to the text length. Returns `true` if the cursor moved.
    pub fn advance_to_at_least(&mut self, pos: usize) -> bool {
        let pos = pos.min(self.text.len());
        if pos > self.cursor {
            self.cursor = pos;
            true
        } else {
            false
        }
    }

    /// Display `shape`. Returns it back only if it differs from what was shown.
    pub fn set_shape(&mut self, shape: MouthShape) -> Option<MouthShape> {
        if self.shape == shape {
            None
        } else {
            self.shape = shape;
            Some(shape)
        }
    }

    pub(crate) fn mark_progress(&mut self, now: Instant) {
        self.last_progress = Some(now);
    }

    /// Back to the start of the text with a closed mouth.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.hold = 0;
        self.shape = MouthShape::Neutral;
        self.last_boundary = None;
        self.last_progress = None;
    }
}
