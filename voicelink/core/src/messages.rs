//! Control Messages
//!
//! The JSON vocabulary spoken over the text side of the connection.
//!
//! - [`ServerCommand`]: every control frame the service can send, keyed by
//!   its `type` field. Unknown types decode to [`ServerCommand::Unknown`] so
//!   new server message kinds never break older devices.
//! - [`OutboundMessage`]: the few frames the engine itself produces.
//!
//! Wire literals (including the service's historical spellings such as
//! `sever-close` and `play_audio_ws_conntceed`) live only in the serde
//! attributes below; the rest of the crate matches on enum variants.
//!
//! The service is loose about scalar types (a `code` may arrive as `4002` or
//! `"4002"`, a `pin` as `5` or `"5"`), so string and integer fields go through
//! lenient deserializers instead of failing the whole frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::gpio::HardwareCommand;

/// Control frames sent by the service to the device
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerCommand {
    /// Server clock probe; echoed back unchanged as `cts_time`
    #[serde(rename = "stc_time")]
    ClockProbe {
        /// Opaque server timestamp
        #[serde(default)]
        stc_time: Value,
    },

    /// Measured round-trip latency, informational only
    #[serde(rename = "net_delay")]
    NetDelay {
        /// Delay in milliseconds
        #[serde(default, deserialize_with = "lenient_int")]
        net_delay: Option<i64>,
    },

    /// User-defined instruction for the host application
    #[serde(rename = "instruct")]
    Instruct {
        /// Instruction identifier
        #[serde(default, deserialize_with = "lenient_string")]
        command_id: String,
        /// Instruction payload
        #[serde(default, deserialize_with = "lenient_string")]
        data: String,
    },

    /// A TTS task is about to stream audio
    #[serde(rename = "play_audio")]
    PlayAudio {
        /// Task identifier
        #[serde(default, deserialize_with = "lenient_string")]
        tts_task_id: String,
        /// Session the task belongs to
        #[serde(default, deserialize_with = "lenient_string")]
        session_id: String,
    },

    /// A conversation session began
    #[serde(rename = "session_start")]
    SessionStart {
        /// Server-issued session identifier (matches binary frame tags)
        #[serde(default, deserialize_with = "lenient_string")]
        session_id: String,
    },

    /// The server stopped the current session
    #[serde(rename = "session_stop")]
    SessionStop,

    /// Recognition progress (`iat_start`, `iat_end`, ...)
    #[serde(rename = "session_status")]
    SessionStatus {
        /// Raw status literal
        #[serde(default, deserialize_with = "lenient_string")]
        status: String,
    },

    /// Device authentication was rejected
    #[serde(rename = "auth_fail")]
    AuthFail {
        /// Human-readable reason
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
        /// Server error code
        #[serde(default, deserialize_with = "lenient_string")]
        code: String,
    },

    /// Service-side error
    #[serde(rename = "error")]
    Error {
        /// Error code (`4000`..`4002` carry local fallback audio)
        #[serde(default, deserialize_with = "lenient_string")]
        code: String,
        /// Where the error occurred (`asr`, `llm`, `tts`, ...)
        #[serde(default, deserialize_with = "lenient_string")]
        at: String,
        /// Human-readable description
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
    },

    /// New WiFi credentials pushed by the service
    #[serde(rename = "set_wifi_config")]
    SetWifiConfig {
        /// Configuration object, passed through to the configurator
        #[serde(default)]
        configs: Value,
    },

    /// Reboot the device
    #[serde(rename = "restart")]
    Restart,

    /// Drop every cached audio asset
    #[serde(rename = "clear_cache")]
    ClearCache,

    /// Persist one key-value pair on the device
    #[serde(rename = "set_local_data")]
    SetLocalData {
        /// Key
        #[serde(default, deserialize_with = "lenient_string")]
        field: String,
        /// Value
        #[serde(default, deserialize_with = "lenient_string")]
        value: String,
    },

    /// A log line pushed by the service
    #[serde(rename = "log")]
    Log {
        /// Log text
        #[serde(default, deserialize_with = "lenient_string")]
        data: String,
    },

    /// The service is closing the connection for good
    #[serde(rename = "sever-close")]
    ServerClose,

    /// Remote pin I/O request
    #[serde(rename = "hardware-fns")]
    HardwareFns(HardwareCommand),

    /// Emotion hint for the host application
    #[serde(rename = "emotion")]
    Emotion {
        /// Emotion payload
        #[serde(default, deserialize_with = "lenient_string")]
        data: String,
    },

    /// Any `type` this device does not understand
    #[serde(other)]
    Unknown,
}

impl ServerCommand {
    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClockProbe { .. } => "stc_time",
            Self::NetDelay { .. } => "net_delay",
            Self::Instruct { .. } => "instruct",
            Self::PlayAudio { .. } => "play_audio",
            Self::SessionStart { .. } => "session_start",
            Self::SessionStop => "session_stop",
            Self::SessionStatus { .. } => "session_status",
            Self::AuthFail { .. } => "auth_fail",
            Self::Error { .. } => "error",
            Self::SetWifiConfig { .. } => "set_wifi_config",
            Self::Restart => "restart",
            Self::ClearCache => "clear_cache",
            Self::SetLocalData { .. } => "set_local_data",
            Self::Log { .. } => "log",
            Self::ServerClose => "sever-close",
            Self::HardwareFns(_) => "hardware-fns",
            Self::Emotion { .. } => "emotion",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames the engine sends to the service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Sent right after connecting: the device can play audio
    #[serde(rename = "play_audio_ws_conntceed")]
    PlaybackReady,

    /// Echo of a [`ServerCommand::ClockProbe`]
    #[serde(rename = "cts_time")]
    ClockEcho {
        /// The probe value, unchanged
        stc_time: Value,
    },

    /// Outcome of a [`ServerCommand::SetWifiConfig`]
    #[serde(rename = "set_wifi_config_res")]
    WifiConfigResult {
        /// Whether the configuration was applied
        success: bool,
    },

    /// The device has received the last audio frame of a TTS stream
    #[serde(rename = "client_out_audio_over")]
    AudioOver {
        /// The terminal tag that closed the stream (`2000` or `2001`)
        session_id: String,
        /// Task that just finished (empty if none was tracked)
        tts_task_id: String,
    },
}

impl OutboundMessage {
    /// Serialize to the JSON text sent over the wire
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Accept strings, numbers, booleans or null where the wire wants a string
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Accept integers, floats or numeric strings where the wire wants an integer
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(b)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_unknown_type_is_tolerated() {
        let cmd: ServerCommand =
            serde_json::from_value(json!({"type": "brand_new_thing", "x": 1})).unwrap();
        assert_eq!(cmd, ServerCommand::Unknown);
    }

    #[test]
    fn test_lenient_fields() {
        let cmd: ServerCommand = serde_json::from_value(json!({
            "type": "error",
            "code": 4002,
            "at": "tts",
            "message": null
        }))
        .unwrap();
        assert_eq!(
            cmd,
            ServerCommand::Error {
                code: "4002".to_string(),
                at: "tts".to_string(),
                message: String::new(),
            }
        );
    }

    #[test]
    fn test_unit_commands_ignore_extra_fields() {
        let cmd: ServerCommand =
            serde_json::from_value(json!({"type": "restart", "command_id": "", "data": ""}))
                .unwrap();
        assert_eq!(cmd, ServerCommand::Restart);

        let cmd: ServerCommand = serde_json::from_value(json!({"type": "sever-close"})).unwrap();
        assert_eq!(cmd, ServerCommand::ServerClose);
    }

    #[test]
    fn test_instruct_object_data_is_stringified() {
        let cmd: ServerCommand = serde_json::from_value(json!({
            "type": "instruct",
            "command_id": "open_light",
            "data": {"level": 3}
        }))
        .unwrap();
        assert_eq!(
            cmd,
            ServerCommand::Instruct {
                command_id: "open_light".to_string(),
                data: r#"{"level":3}"#.to_string(),
            }
        );
    }

    #[test]
    fn test_outbound_wire_literals() {
        assert_eq!(
            OutboundMessage::PlaybackReady.to_text().unwrap(),
            r#"{"type":"play_audio_ws_conntceed"}"#
        );

        let echo = OutboundMessage::ClockEcho {
            stc_time: json!("1700000000123"),
        };
        assert_eq!(
            echo.to_text().unwrap(),
            r#"{"type":"cts_time","stc_time":"1700000000123"}"#
        );

        let over: Value = serde_json::from_str(
            &OutboundMessage::AudioOver {
                session_id: "2001".to_string(),
                tts_task_id: "t-9".to_string(),
            }
            .to_text()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            over,
            json!({"type": "client_out_audio_over", "session_id": "2001", "tts_task_id": "t-9"})
        );
    }

    #[test]
    fn test_command_name() {
        assert_eq!(ServerCommand::ServerClose.name(), "sever-close");
        assert_eq!(ServerCommand::ClearCache.name(), "clear_cache");
    }
}
