//! Text-driven lip-sync.
//!
//! A [`SpeechDriver`] hands the utterance to a [`SpeechEngine`] and turns
//! its progress reports into mouth shapes. Two producers share one
//! [`SpeechSession`] cursor:
//!
//! - the [`BoundaryController`], fed by engine boundary notifications, and
//! - the [`FallbackDriver`], a fixed-rate ticker that keeps the mouth moving
//!   when boundaries are sparse and closes it during pauses.

pub mod boundary;
pub mod driver;
pub mod engine;
pub mod fallback;
pub mod session;

pub use boundary::BoundaryController;
pub use driver::SpeechDriver;
pub use engine::{EngineEvent, PacedEngine, SpeechEngine, UtteranceRequest};
pub use fallback::FallbackDriver;
pub use session::{SessionId, SpeechSession};
