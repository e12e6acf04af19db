//! Frame Classification
//!
//! Decides what an inbound message is before any state is touched.
//!
//! # Binary Frame Format
//!
//! ```text
//! +----------------+------------------------------------------+
//! | Tag (4)        | Payload (variable, may be empty)         |
//! | ASCII          | encoded audio                            |
//! +----------------+------------------------------------------+
//! ```
//!
//! | Tag    | Meaning                                           |
//! |--------|---------------------------------------------------|
//! | `0000` | prompt beep, played immediately                   |
//! | `0001` | connect greeting, played once per boot            |
//! | `1000` | prompt beep cache fill                            |
//! | `1001` | wake greeting cache fill                          |
//! | `1002` | sleep reply cache fill                            |
//! | `2000` | last frame of a reply, conversation continues     |
//! | `2001` | last frame of a reply, conversation is over       |
//! | `2002` | end of one chunk of a TTS task group              |
//! | other  | session id; payload belongs to that session       |
//!
//! # Text Frames
//!
//! Text frames are JSON objects with a `type` field. The bare text
//! `session_end` (or a JSON object of that type) is recognised before any
//! generic parsing.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::cache::CacheSlot;
use crate::messages::ServerCommand;

/// Length of the binary frame tag prefix
pub const TAG_LEN: usize = 4;

/// The session-end sentinel
pub const SESSION_END: &str = "session_end";

/// Errors produced while classifying a frame
///
/// These never reach the transport: the engine logs them and drops the frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Binary frame shorter than its tag
    #[error("binary frame too short: {len} bytes (need {TAG_LEN})")]
    TooShort {
        /// Actual frame length
        len: usize,
    },

    /// Tag bytes are not printable ASCII
    #[error("binary frame tag is not ASCII: {0:02x?}")]
    InvalidTag([u8; TAG_LEN]),

    /// Text frame is not valid JSON, or a known command has bad fields
    #[error("malformed control frame: {0}")]
    MalformedJson(String),

    /// Text frame is JSON but not an object with a string `type`
    #[error("control frame has no `type` field")]
    MissingType,
}

/// Decoded binary frame tag
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryTag {
    /// `0000`: prompt beep
    Beep,
    /// `0001`: connect greeting
    ConnectGreeting,
    /// `1000` / `1001` / `1002`: cache fill
    CacheFill(CacheSlot),
    /// `2000`: reply finished, keep the conversation going
    ReplyContinue,
    /// `2001`: reply finished, conversation over
    ReplyEnd,
    /// `2002`: one chunk of a TTS task group finished
    ChunkEnd,
    /// Any other tag: the session the audio belongs to
    Session(String),
}

impl BinaryTag {
    /// Decode a tag from its wire form
    #[must_use]
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "0000" => Self::Beep,
            "0001" => Self::ConnectGreeting,
            "1000" => Self::CacheFill(CacheSlot::Prompt),
            "1001" => Self::CacheFill(CacheSlot::Greeting),
            "1002" => Self::CacheFill(CacheSlot::SleepReply),
            "2000" => Self::ReplyContinue,
            "2001" => Self::ReplyEnd,
            "2002" => Self::ChunkEnd,
            other => Self::Session(other.to_string()),
        }
    }

    /// The wire form of this tag
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Beep => "0000",
            Self::ConnectGreeting => "0001",
            Self::CacheFill(CacheSlot::Prompt) => "1000",
            Self::CacheFill(CacheSlot::Greeting) => "1001",
            Self::CacheFill(CacheSlot::SleepReply) => "1002",
            Self::ReplyContinue => "2000",
            Self::ReplyEnd => "2001",
            Self::ChunkEnd => "2002",
            Self::Session(id) => id,
        }
    }

    /// Whether this tag is one of the fixed system tags
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        !matches!(self, Self::Session(_))
    }
}

impl fmt::Display for BinaryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A classified inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame<'a> {
    /// The session-end sentinel
    SessionEnd,
    /// A JSON control command
    Command(ServerCommand),
    /// Tagged audio
    Audio {
        /// Decoded tag
        tag: BinaryTag,
        /// Bytes after the tag
        payload: &'a [u8],
    },
}

/// Classify a text frame
pub fn classify_text(text: &str) -> Result<InboundFrame<'static>, FrameError> {
    let text = text.trim();
    if text == SESSION_END {
        return Ok(InboundFrame::SessionEnd);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::MalformedJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;
    if kind == SESSION_END {
        return Ok(InboundFrame::SessionEnd);
    }

    let command = serde_json::from_value(value)
        .map_err(|e| FrameError::MalformedJson(e.to_string()))?;
    Ok(InboundFrame::Command(command))
}

/// Classify a binary frame
pub fn classify_binary(data: &[u8]) -> Result<InboundFrame<'_>, FrameError> {
    if data.len() < TAG_LEN {
        return Err(FrameError::TooShort { len: data.len() });
    }

    let (raw_tag, payload) = data.split_at(TAG_LEN);
    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(raw_tag);

    if !tag_bytes.iter().all(u8::is_ascii_graphic) {
        return Err(FrameError::InvalidTag(tag_bytes));
    }
    // All bytes are ASCII, so this cannot fail
    let tag = std::str::from_utf8(raw_tag).map_err(|_| FrameError::InvalidTag(tag_bytes))?;

    Ok(InboundFrame::Audio {
        tag: BinaryTag::from_wire(tag),
        payload,
    })
}
