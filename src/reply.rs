//! Classification of remote reply payloads.
//!
//! The host performs the request; this module only decides whether the body
//! is something to play (a video) or something to speak (text).

use crate::error::{LipSyncError, Result};
use serde_json::Value;
use tracing::debug;

const URL_KEYS: &[&str] = &["video_url", "videoUrl", "video", "url"];
const TEXT_KEYS: &[&str] = &["text", "reply", "message", "output"];

/// What a reply body turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarReply {
    /// JSON pointing at a video, optionally with a transcript.
    Video { url: String, text: Option<String> },
    /// A binary video payload.
    VideoBytes { content_type: String, bytes: Vec<u8> },
    /// Text to speak.
    Text(String),
    /// Nothing usable.
    Empty,
}

impl AvatarReply {
    /// Classify a response body by its `Content-Type`.
    ///
    /// Without a content type, a body that looks like a JSON object is parsed
    /// as JSON and anything else is treated as text.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Reply`] when a JSON body does not parse.
    pub fn from_response(content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let media = content_type.map(media_type);
        let reply = match media.as_deref() {
            Some(m) if is_json(m) => Self::from_json(body)?,
            Some(m) if m.starts_with("video/") || m == "application/octet-stream" => {
                if body.is_empty() {
                    Self::Empty
                } else {
                    Self::VideoBytes {
                        content_type: m.to_owned(),
                        bytes: body.to_vec(),
                    }
                }
            }
            None if body.trim_ascii_start().starts_with(b"{") => Self::from_json(body)?,
            _ => Self::from_text(&String::from_utf8_lossy(body)),
        };
        debug!(kind = reply.kind(), "reply classified");
        Ok(reply)
    }

    fn from_json(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| LipSyncError::Reply(format!("invalid JSON reply: {e}")))?;
        let url = first_string(&value, URL_KEYS);
        let text = first_string(&value, TEXT_KEYS);
        Ok(match (url, text) {
            (Some(url), text) => Self::Video { url, text },
            (None, Some(text)) => Self::Text(text),
            (None, None) => Self::Empty,
        })
    }

    fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Text(text.to_owned())
        }
    }

    /// Text to hand to the speech driver, if any.
    pub fn speakable_text(&self) -> Option<&str> {
        match self {
            Self::Video { text, .. } => text.as_deref(),
            Self::Text(text) => Some(text),
            Self::VideoBytes { .. } | Self::Empty => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Video { .. } => "video",
            Self::VideoBytes { .. } => "video-bytes",
            Self::Text(_) => "text",
            Self::Empty => "empty",
        }
    }
}

/// `"Video/MP4; codecs=avc1"` -> `"video/mp4"`.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(media: &str) -> bool {
    media == "application/json" || media.ends_with("+json")
}

/// First non-blank string value under any of `keys`, in key order.
fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}
