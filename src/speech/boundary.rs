//! Boundary-driven timing: follows the speech engine's progress reports.
//!
//! Engines report boundaries irregularly (per word on most desktop voices,
//! per character on a few, never on some). Boundary reports are treated as
//! authoritative when present, rate-limited, and only ever move the cursor
//! forward.

use super::session::SpeechSession;
use crate::config::SpeechTimingConfig;
use crate::viseme::{MouthShape, is_pause_char, map_offset, skip_pauses};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Applies engine lifecycle and boundary notifications to a session.
#[derive(Debug, Clone)]
pub struct BoundaryController {
    min_interval: Duration,
}

impl BoundaryController {
    pub fn new(config: &SpeechTimingConfig) -> Self {
        Self {
            min_interval: config.boundary_min_interval(),
        }
    }

    /// The utterance started: rewind to the beginning with a closed mouth.
    pub fn on_start(&self, session: &mut SpeechSession, now: Instant) -> Option<MouthShape> {
        let change = session.set_shape(MouthShape::Neutral);
        session.reset();
        session.mark_progress(now);
        change
    }

    /// The engine reached `char_index`.
    ///
    /// Returns the newly displayed shape, or `None` when the notification was
    /// rate-limited, stale, or did not change the mouth.
    pub fn on_boundary(
        &self,
        session: &mut SpeechSession,
        char_index: usize,
        now: Instant,
    ) -> Option<MouthShape> {
        if let Some(last) = session.last_boundary
            && now.saturating_duration_since(last) < self.min_interval
        {
            debug!(session = %session.id(), char_index, "boundary rate-limited");
            return None;
        }

        let target = skip_pauses(session.text(), char_index);
        if target < session.cursor() {
            debug!(
                session = %session.id(),
                char_index,
                cursor = session.cursor(),
                "stale boundary dropped"
            );
            return None;
        }

        session.last_boundary = Some(now);
        session.hold = 0;

        let at_pause = session
            .text()
            .get(char_index)
            .is_none_or(|c| is_pause_char(*c));
        let shape = if at_pause {
            MouthShape::Neutral
        } else {
            map_offset(session.text(), target)
        };

        session.advance_to_at_least(target);
        session.mark_progress(now);
        session.set_shape(shape)
    }

    /// The utterance ended or failed: close the mouth.
    pub fn on_end(&self, session: &mut SpeechSession) -> Option<MouthShape> {
        session.hold = 0;
        session.set_shape(MouthShape::Neutral)
    }

    /// The engine failed mid-utterance. Treated like an end.
    pub fn on_error(&self, session: &mut SpeechSession, reason: &str) -> Option<MouthShape> {
        warn!(session = %session.id(), %reason, "speech engine error, closing mouth");
        self.on_end(session)
    }
}
