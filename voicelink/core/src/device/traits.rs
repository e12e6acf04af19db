//! Collaborator Traits
//!
//! Each trait is one hardware concern. Implementations must be `Send` so an
//! engine can be moved onto the task that owns the transport.

use serde_json::Value;
use thiserror::Error;

use super::{Notification, WakeReason};
use crate::gpio::{Level, PinMode, PwmChannel};

/// Failure reported by a device collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The audio decoder rejected an operation
    #[error("decoder error: {0}")]
    Decoder(String),

    /// A pin operation failed
    #[error("pin {pin}: {reason}")]
    Pin {
        /// Pin number
        pin: u32,
        /// What went wrong
        reason: String,
    },

    /// A PWM channel operation failed
    #[error("pwm channel {channel}: {reason}")]
    Pwm {
        /// Channel number
        channel: u8,
        /// What went wrong
        reason: String,
    },

    /// Local persistence failed
    #[error("store error: {0}")]
    Store(String),

    /// WiFi configuration failed
    #[error("wifi error: {0}")]
    Wifi(String),
}

/// Streaming audio decoder
///
/// `begin` opens a playback stream, `write` feeds encoded bytes, `end`
/// closes it. The engine always ends before beginning again.
pub trait AudioDecoder: Send {
    /// Open a playback stream
    fn begin(&mut self) -> Result<(), DeviceError>;

    /// Feed encoded audio
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Close the playback stream
    fn end(&mut self) -> Result<(), DeviceError>;

    /// Whether the decoder can accept writes right now
    fn is_ready(&self) -> bool {
        true
    }
}

/// Raw pin I/O
pub trait PinDriver: Send {
    /// Set a digital pin mode
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), DeviceError>;

    /// Configure a PWM channel
    fn configure_pwm(&mut self, channel: u8, pwm: PwmChannel) -> Result<(), DeviceError>;

    /// Route a PWM channel to a pin
    fn attach_pwm(&mut self, pin: u32, channel: u8) -> Result<(), DeviceError>;

    /// Drive a digital output
    fn digital_write(&mut self, pin: u32, level: Level) -> Result<(), DeviceError>;

    /// Write a raw analog duty value
    fn analog_write(&mut self, pin: u32, duty: i64) -> Result<(), DeviceError>;

    /// Write a duty value to a PWM channel
    fn pwm_write(&mut self, channel: u8, duty: u32) -> Result<(), DeviceError>;
}

/// Key-value persistence
pub trait LocalStore: Send {
    /// Store one value
    fn set(&mut self, field: &str, value: &str) -> Result<(), DeviceError>;
}

/// WiFi provisioning
pub trait WifiConfigurator: Send {
    /// Apply pushed configuration, returning whether it took effect
    fn apply(&mut self, configs: &Value) -> Result<bool, DeviceError>;
}

/// Platform control
pub trait Platform: Send {
    /// Restart the device
    fn reboot(&mut self);

    /// Start listening again
    fn wake_up(&mut self, reason: WakeReason);
}

/// Receiver for upward notifications
pub trait NotificationSink: Send {
    /// Deliver one notification
    fn notify(&mut self, notification: Notification);
}
