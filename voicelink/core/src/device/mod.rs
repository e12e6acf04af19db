//! Device Capabilities
//!
//! Everything the engine needs from the physical device, expressed as
//! traits and injected once at construction through a [`Device`] bundle.
//!
//! # Design Philosophy
//!
//! The engine owns protocol state; the device owns hardware. The engine
//! never assumes how audio is decoded, how pins are driven or where key-value
//! pairs are persisted. It only calls through these traits and reports
//! upward through a single [`NotificationSink`].
//!
//! Collaborator failures come back as [`DeviceError`]. The engine logs them
//! and keeps processing; none of them end the connection.

pub mod simulated;
mod traits;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use traits::{
    AudioDecoder, DeviceError, LocalStore, NotificationSink, PinDriver, Platform,
    WifiConfigurator,
};

/// Network status reported to the host application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetStatus {
    /// The service connection dropped
    Disconnected,
    /// The service connection is up
    Connected,
}

impl NetStatus {
    /// Status code used by device firmware (`"2"` / `"3"`)
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Disconnected => "2",
            Self::Connected => "3",
        }
    }
}

impl fmt::Display for NetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error surfaced to the host application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error code
    pub code: String,
    /// Stage that failed (`auth`, `asr`, `llm`, `tts`, ...)
    pub at: String,
    /// Human-readable description
    pub message: String,
}

impl ErrorReport {
    /// Build a report
    pub fn new(code: impl Into<String>, at: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            at: at.into(),
            message: message.into(),
        }
    }
}

/// Why the engine asked the platform to start listening
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakeReason {
    /// The previous reply drained and the conversation continues
    Continue,
}

impl WakeReason {
    /// Wire-compatible name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
        }
    }
}

/// Upward notifications to the host application
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Connection status changed
    NetStatus(NetStatus),
    /// A `session_status` value, or `tts_real_end` when a reply finished
    SessionStatus(String),
    /// A protocol error
    Error(ErrorReport),
    /// A user-defined instruction
    Instruction {
        /// Instruction identifier
        command_id: String,
        /// Instruction payload
        data: String,
    },
    /// An emotion hint
    Emotion(String),
}

/// The collaborators an [`crate::Engine`] drives
pub struct Device {
    /// Audio output
    pub decoder: Box<dyn AudioDecoder>,
    /// Physical pin access
    pub pins: Box<dyn PinDriver>,
    /// Local key-value persistence
    pub store: Box<dyn LocalStore>,
    /// WiFi provisioning
    pub wifi: Box<dyn WifiConfigurator>,
    /// Reboot and wake-up
    pub platform: Box<dyn Platform>,
    /// Upward notifications
    pub sink: Box<dyn NotificationSink>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("decoder_ready", &self.decoder.is_ready())
            .finish_non_exhaustive()
    }
}
