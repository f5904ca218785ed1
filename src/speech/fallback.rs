//! Timer-driven fallback: keeps the mouth moving when the engine reports
//! few or no boundaries, and closes it during pauses.

use super::session::SpeechSession;
use crate::config::SpeechTimingConfig;
use crate::viseme::{GraphemeTable, MouthShape, is_pause_char};
use std::time::{Duration, Instant};

/// Advances the shared cursor one grapheme per tick.
#[derive(Debug, Clone)]
pub struct FallbackDriver {
    vowel_hold_ticks: u32,
    pause_threshold: Duration,
}

impl FallbackDriver {
    pub fn new(config: &SpeechTimingConfig) -> Self {
        Self {
            vowel_hold_ticks: config.vowel_hold_ticks,
            pause_threshold: config.pause_threshold(),
        }
    }

    /// One ticker step.
    ///
    /// A pending hold is consumed first; the cursor and the mapper are left
    /// alone on that tick.
    pub fn tick(&self, session: &mut SpeechSession, now: Instant) -> Option<MouthShape> {
        if session.hold > 0 {
            session.hold -= 1;
            return None;
        }

        let cursor = session.cursor();
        let &c = session.text().get(cursor)?;
        session.mark_progress(now);

        if is_pause_char(c) {
            session.advance_to_at_least(cursor + 1);
            return session.set_shape(MouthShape::Neutral);
        }

        let grapheme = GraphemeTable::global().lookup(session.text(), cursor);
        session.hold = if grapheme.shape.is_vowel() {
            self.vowel_hold_ticks
        } else {
            0
        };
        session.advance_to_at_least(cursor + grapheme.width.max(1));
        session.set_shape(grapheme.shape)
    }

    /// Close the mouth if neither driver has made progress for longer than
    /// the pause threshold.
    pub fn check_pause(&self, session: &mut SpeechSession, now: Instant) -> Option<MouthShape> {
        let last = session.last_progress?;
        if now.saturating_duration_since(last) > self.pause_threshold {
            session.set_shape(MouthShape::Neutral)
        } else {
            None
        }
    }
}
