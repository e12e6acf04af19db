//! Remote I/O Proxy
//!
//! Interprets `hardware-fns` control frames: the service can set pin modes,
//! drive outputs, queue reads and steer a servo on a PWM channel.
//!
//! # Wire Shape
//!
//! ```json
//! {"type":"hardware-fns","pin":5,"fn_name":"pinMode","str_val":"LEDC",
//!  "num_val":0,"channel":2,"freq":50,"resolution":10}
//! ```
//!
//! | `fn_name`      | Effect                                               |
//! |----------------|------------------------------------------------------|
//! | `pinMode`      | `OUTPUT` / `INPUT` / `INPUT_PULLUP` / `INPUT_PULLDOWN`, or `LEDC` to set up and attach a PWM channel |
//! | `digitalWrite` | `HIGH` / `LOW`                                       |
//! | `analogWrite`  | raw `num_val` duty                                   |
//! | `digitalRead`  | queue the pin for the host's digital poller          |
//! | `analogRead`   | queue the pin for the host's analog poller           |
//! | `ledcWrite`    | servo angle `deg` on `channel`                       |
//!
//! # Servo Mapping
//!
//! A hobby servo expects a 500..2500 µs pulse for 0..180 degrees. The duty
//! written to the channel is that pulse expressed in the channel's period and
//! resolution, rounded to nearest. At 50 Hz and 10 bits that spans 26..=128.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{DeviceError, PinDriver};
use crate::messages::{lenient_int, lenient_string};

/// Highest PWM resolution accepted from the wire
pub const MAX_RESOLUTION_BITS: u8 = 20;

/// Servo travel in degrees
const SERVO_RANGE_DEG: u64 = 180;

// ============================================================================
// Pin Vocabulary
// ============================================================================

/// Digital pin mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinMode {
    /// Push-pull output
    Output,
    /// Floating input
    Input,
    /// Input with pull-up
    InputPullup,
    /// Input with pull-down
    InputPulldown,
}

impl PinMode {
    /// Map a wire literal
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "OUTPUT" => Some(Self::Output),
            "INPUT" => Some(Self::Input),
            "INPUT_PULLUP" => Some(Self::InputPullup),
            "INPUT_PULLDOWN" => Some(Self::InputPulldown),
            _ => None,
        }
    }
}

/// Digital output level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Logic high
    High,
    /// Logic low
    Low,
}

impl Level {
    /// Map a wire literal
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "HIGH" => Some(Self::High),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Frequency and resolution of one PWM channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PwmChannel {
    /// Frequency in Hz
    pub freq_hz: u32,
    /// Duty resolution in bits
    pub resolution_bits: u8,
}

/// PWM defaults and servo pulse bounds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmConfig {
    /// Channel used when a frame omits `channel`
    pub default_channel: u8,
    /// Frequency used when a frame omits `freq`
    pub default_freq_hz: u32,
    /// Resolution used when a frame omits `resolution`
    pub default_resolution_bits: u8,
    /// Pulse width at 0 degrees
    pub min_pulse_us: u32,
    /// Pulse width at 180 degrees
    pub max_pulse_us: u32,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            default_channel: 0,
            default_freq_hz: 50,
            default_resolution_bits: 10,
            min_pulse_us: 500,
            max_pulse_us: 2500,
        }
    }
}

impl PwmConfig {
    /// Channel settings when nothing else is known
    #[must_use]
    pub fn default_settings(&self) -> PwmChannel {
        PwmChannel {
            freq_hz: self.default_freq_hz,
            resolution_bits: self.default_resolution_bits,
        }
    }
}

/// Convert a servo angle into a channel duty value
///
/// `deg` is clamped to 0..=180.
#[must_use]
pub fn angle_to_duty(deg: i64, pwm: PwmChannel, config: &PwmConfig) -> u32 {
    let deg = u64::try_from(deg.clamp(0, 180)).unwrap_or(0);
    let min = u64::from(config.min_pulse_us);
    let max = u64::from(config.max_pulse_us).max(min);
    let pulse_us = min + (max - min) * deg / SERVO_RANGE_DEG;

    let period_us = (1_000_000 / u64::from(pwm.freq_hz.max(1))).max(1);
    let bits = pwm.resolution_bits.min(MAX_RESOLUTION_BITS);
    let full_scale = 1u64 << bits;

    let duty = (full_scale * pulse_us + period_us / 2) / period_us;
    u32::try_from(duty.min(full_scale - 1)).unwrap_or(u32::MAX)
}

// ============================================================================
// Commands
// ============================================================================

/// Errors interpreting a `hardware-fns` frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// `fn_name` is not one this proxy knows
    #[error("unknown hardware function: {0:?}")]
    UnknownFunction(String),

    /// `pinMode` with an unsupported mode
    #[error("unknown pin mode: {0:?}")]
    UnknownMode(String),

    /// `digitalWrite` with something other than HIGH/LOW
    #[error("unknown level: {0:?}")]
    UnknownLevel(String),

    /// A required field is absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A numeric field does not fit
    #[error("field `{field}` out of range: {value}")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Offending value
        value: i64,
    },

    /// The pin driver failed
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A raw `hardware-fns` frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct HardwareCommand {
    /// Target pin
    #[serde(default, deserialize_with = "lenient_int")]
    pub pin: Option<i64>,
    /// Function name
    #[serde(default, deserialize_with = "lenient_string")]
    pub fn_name: String,
    /// String argument (mode or level)
    #[serde(default, deserialize_with = "lenient_string")]
    pub str_val: String,
    /// Numeric argument (analog duty)
    #[serde(default, deserialize_with = "lenient_int")]
    pub num_val: Option<i64>,
    /// PWM channel
    #[serde(default, deserialize_with = "lenient_int")]
    pub channel: Option<i64>,
    /// PWM frequency
    #[serde(default, deserialize_with = "lenient_int")]
    pub freq: Option<i64>,
    /// PWM resolution
    #[serde(default, deserialize_with = "lenient_int")]
    pub resolution: Option<i64>,
    /// Servo angle
    #[serde(default, deserialize_with = "lenient_int")]
    pub deg: Option<i64>,
}

/// A validated hardware operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HardwareOp {
    /// Set a digital pin mode
    SetMode {
        /// Pin
        pin: u32,
        /// Mode
        mode: PinMode,
    },
    /// Configure a PWM channel and attach it to a pin
    AttachPwm {
        /// Pin
        pin: u32,
        /// Channel
        channel: u8,
        /// Channel settings
        pwm: PwmChannel,
    },
    /// Drive a digital output
    DigitalWrite {
        /// Pin
        pin: u32,
        /// Level
        level: Level,
    },
    /// Write a raw analog duty
    AnalogWrite {
        /// Pin
        pin: u32,
        /// Duty
        duty: i64,
    },
    /// Queue a digital read
    DigitalRead {
        /// Pin
        pin: u32,
    },
    /// Queue an analog read
    AnalogRead {
        /// Pin
        pin: u32,
    },
    /// Move a servo
    ServoWrite {
        /// Channel
        channel: u8,
        /// Angle in degrees, before clamping
        deg: i64,
    },
}

fn narrow<T: TryFrom<i64>>(field: &'static str, value: i64) -> Result<T, HardwareError> {
    T::try_from(value).map_err(|_| HardwareError::OutOfRange { field, value })
}

impl HardwareCommand {
    /// Validate into an operation, filling PWM defaults from `config`
    pub fn parse(&self, config: &PwmConfig) -> Result<HardwareOp, HardwareError> {
        match self.fn_name.as_str() {
            "pinMode" => {
                let pin = self.pin()?;
                if self.str_val == "LEDC" {
                    return Ok(HardwareOp::AttachPwm {
                        pin,
                        channel: self.channel(config)?,
                        pwm: self.pwm(config)?,
                    });
                }
                let mode = PinMode::from_wire(&self.str_val)
                    .ok_or_else(|| HardwareError::UnknownMode(self.str_val.clone()))?;
                Ok(HardwareOp::SetMode { pin, mode })
            }
            "digitalWrite" => {
                let pin = self.pin()?;
                let level = Level::from_wire(&self.str_val)
                    .ok_or_else(|| HardwareError::UnknownLevel(self.str_val.clone()))?;
                Ok(HardwareOp::DigitalWrite { pin, level })
            }
            "analogWrite" => Ok(HardwareOp::AnalogWrite {
                pin: self.pin()?,
                duty: self.num_val.unwrap_or(0),
            }),
            "digitalRead" => Ok(HardwareOp::DigitalRead { pin: self.pin()? }),
            "analogRead" => Ok(HardwareOp::AnalogRead { pin: self.pin()? }),
            "ledcWrite" => Ok(HardwareOp::ServoWrite {
                channel: self.channel(config)?,
                deg: self.deg.ok_or(HardwareError::MissingField("deg"))?,
            }),
            other => Err(HardwareError::UnknownFunction(other.to_string())),
        }
    }

    fn pin(&self) -> Result<u32, HardwareError> {
        let pin = self.pin.ok_or(HardwareError::MissingField("pin"))?;
        narrow("pin", pin)
    }

    fn channel(&self, config: &PwmConfig) -> Result<u8, HardwareError> {
        self.channel
            .map_or(Ok(config.default_channel), |channel| narrow("channel", channel))
    }

    fn pwm(&self, config: &PwmConfig) -> Result<PwmChannel, HardwareError> {
        let freq_hz = match self.freq {
            Some(freq) if freq > 0 => narrow("freq", freq)?,
            Some(freq) => return Err(HardwareError::OutOfRange { field: "freq", value: freq }),
            None => config.default_freq_hz,
        };
        let resolution_bits = match self.resolution {
            Some(bits) if (1..=i64::from(MAX_RESOLUTION_BITS)).contains(&bits) => {
                narrow("resolution", bits)?
            }
            Some(bits) => {
                return Err(HardwareError::OutOfRange {
                    field: "resolution",
                    value: bits,
                })
            }
            None => config.default_resolution_bits,
        };
        Ok(PwmChannel {
            freq_hz,
            resolution_bits,
        })
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// Pins the host should sample and report back
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingPinReads {
    digital: Vec<u32>,
    analog: Vec<u32>,
}

impl PendingPinReads {
    /// Queued digital reads, oldest first
    #[must_use]
    pub fn digital(&self) -> &[u32] {
        &self.digital
    }

    /// Queued analog reads, oldest first
    #[must_use]
    pub fn analog(&self) -> &[u32] {
        &self.analog
    }

    /// Take every queued digital read
    pub fn take_digital(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.digital)
    }

    /// Take every queued analog read
    pub fn take_analog(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.analog)
    }

    /// Whether both queues are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digital.is_empty() && self.analog.is_empty()
    }
}

/// Executes hardware operations against a [`PinDriver`]
///
/// Remembers every channel set up through `pinMode LEDC` so later servo
/// writes use that channel's own frequency and resolution.
#[derive(Clone, Debug, Default)]
pub struct RemoteIo {
    config: PwmConfig,
    channels: BTreeMap<u8, PwmChannel>,
    pending: PendingPinReads,
}

impl RemoteIo {
    /// Create a proxy with the given PWM defaults
    #[must_use]
    pub fn new(config: PwmConfig) -> Self {
        Self {
            config,
            channels: BTreeMap::new(),
            pending: PendingPinReads::default(),
        }
    }

    /// Settings of a configured channel
    #[must_use]
    pub fn channel(&self, channel: u8) -> Option<PwmChannel> {
        self.channels.get(&channel).copied()
    }

    /// Queued pin reads
    #[must_use]
    pub fn pending(&self) -> &PendingPinReads {
        &self.pending
    }

    /// Queued pin reads, for draining
    pub fn pending_mut(&mut self) -> &mut PendingPinReads {
        &mut self.pending
    }

    /// Validate and execute one command
    pub fn apply(
        &mut self,
        command: &HardwareCommand,
        pins: &mut dyn PinDriver,
    ) -> Result<HardwareOp, HardwareError> {
        let op = command.parse(&self.config)?;
        match &op {
            HardwareOp::SetMode { pin, mode } => pins.set_mode(*pin, *mode)?,
            HardwareOp::AttachPwm { pin, channel, pwm } => {
                pins.configure_pwm(*channel, *pwm)?;
                self.channels.insert(*channel, *pwm);
                pins.attach_pwm(*pin, *channel)?;
            }
            HardwareOp::DigitalWrite { pin, level } => pins.digital_write(*pin, *level)?,
            HardwareOp::AnalogWrite { pin, duty } => pins.analog_write(*pin, *duty)?,
            HardwareOp::DigitalRead { pin } => self.pending.digital.push(*pin),
            HardwareOp::AnalogRead { pin } => self.pending.analog.push(*pin),
            HardwareOp::ServoWrite { channel, deg } => {
                let settings = self
                    .channel(*channel)
                    .unwrap_or_else(|| self.config.default_settings());
                let duty = angle_to_duty(*deg, settings, &self.config);
                tracing::debug!(channel, deg, duty, "servo write");
                pins.pwm_write(*channel, duty)?;
            }
        }
        Ok(op)
    }
}
