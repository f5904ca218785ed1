//! Lip-sync core for a talking avatar.
//!
//! Turns either text being spoken or an audio signal into a stream of mouth
//! cues a host can render as sprites:
//!
//! Text → speech engine boundaries + fallback ticker → [`MouthShape`]
//!
//! Audio → RMS envelope → quantizer → [`MouthCue`]
//!
//! # Architecture
//!
//! - **viseme**: the mouth shape set and the grapheme → shape table
//! - **speech**: per-utterance session task driven by a [`SpeechEngine`]
//! - **envelope**: loudness follower over an [`AudioSource`] (buffer, WAV,
//!   or microphone with the `mic` feature)
//! - **avatar**: the host façade that keeps one mode running at a time
//! - **reply**: classifies remote reply bodies into video or speakable text
//!
//! All cues go out on one broadcast channel as [`MouthEvent`]s.

pub mod avatar;
pub mod config;
pub mod envelope;
pub mod error;
pub mod reply;
pub mod runtime;
pub mod speech;
pub mod viseme;

pub use avatar::{Avatar, AvatarMode};
pub use config::LipSyncConfig;
pub use envelope::{AudioSource, BufferSource, EnvelopeDriver, Quantizer};
pub use error::{LipSyncError, Result};
pub use reply::AvatarReply;
pub use runtime::{CueSource, MouthEvent};
pub use speech::{PacedEngine, SessionId, SpeechEngine};
pub use viseme::{LegacyMouth, MouthCue, MouthShape};
