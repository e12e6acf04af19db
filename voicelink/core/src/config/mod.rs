//! TOML Configuration File Support
//!
//! Centralized configuration loading for voicelink, from a TOML file at
//! `~/.config/voicelink/voicelink.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`VOICELINK_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! url = "ws://192.168.1.10:8088"
//! reconnect_interval_ms = 3000
//!
//! [engine]
//! listen_mode = false
//! audio_drain_ms = 300
//! capture_settle_ms = 500
//!
//! [pwm]
//! default_channel = 0
//! default_freq_hz = 50
//! default_resolution_bits = 10
//! min_pulse_us = 500
//! max_pulse_us = 2500
//!
//! [fallback]
//! insufficient_quota = "/usr/share/voicelink/quota.mp3"
//! card_missing = "/usr/share/voicelink/card.mp3"
//! feature_disabled = "/usr/share/voicelink/disabled.mp3"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fallback::FallbackClip;
use crate::gpio::{PwmConfig, MAX_RESOLUTION_BITS};

/// Server used when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8088";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Defaults only
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// WebSocket URL of the voice service
    pub url: Option<String>,

    /// Delay between reconnection attempts in milliseconds
    pub reconnect_interval_ms: Option<u64>,
}

/// `[engine]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Push-to-talk mode: never reopen the microphone automatically
    pub listen_mode: Option<bool>,

    /// How long queued reply audio needs to drain before listening resumes
    pub audio_drain_ms: Option<u64>,

    /// How long after `iat_end` the utterance counts as fully captured
    pub capture_settle_ms: Option<u64>,
}

/// `[pwm]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmToml {
    /// Channel used when a frame omits `channel`
    pub default_channel: Option<u8>,

    /// Frequency used when a frame omits `freq`
    pub default_freq_hz: Option<u32>,

    /// Resolution used when a frame omits `resolution`
    pub default_resolution_bits: Option<u8>,

    /// Servo pulse width at 0 degrees
    pub min_pulse_us: Option<u32>,

    /// Servo pulse width at 180 degrees
    pub max_pulse_us: Option<u32>,
}

/// `[fallback]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackToml {
    /// Clip for error `4002`
    pub insufficient_quota: Option<PathBuf>,

    /// Clip for error `4001`
    pub card_missing: Option<PathBuf>,

    /// Clip for error `4000`
    pub feature_disabled: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicelinkToml {
    /// Server section
    pub server: ServerToml,

    /// Engine section
    pub engine: EngineToml,

    /// PWM section
    pub pwm: PwmToml,

    /// Fallback clip section
    pub fallback: FallbackToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Protocol engine settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Push-to-talk mode
    pub listen_mode: bool,
    /// Delay before resuming listening after a `2000` reply
    pub audio_drain: Duration,
    /// Delay after `iat_end` before the capture counts as settled
    pub capture_settle: Duration,
    /// PWM defaults for the remote I/O proxy
    pub pwm: PwmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_mode: false,
            audio_drain: Duration::from_millis(300),
            capture_settle: Duration::from_millis(500),
            pwm: PwmConfig::default(),
        }
    }
}

/// Transport settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    /// WebSocket URL
    pub url: String,
    /// Delay between reconnection attempts
    pub reconnect_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            reconnect_interval: Duration::from_secs(3),
        }
    }
}

/// Everything loaded from file and environment
#[derive(Clone, Debug)]
pub struct VoicelinkConfig {
    /// Engine settings
    pub engine: EngineConfig,

    /// Transport settings
    pub link: LinkConfig,

    /// Fallback clip files
    pub fallback: BTreeMap<FallbackClip, PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for VoicelinkConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            link: LinkConfig::default(),
            fallback: BTreeMap::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl VoicelinkConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.link.url.starts_with("ws://") || self.link.url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "server url must use ws:// or wss://, got {:?}",
                self.link.url
            )));
        }
        if self.link.reconnect_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }
        let pwm = &self.engine.pwm;
        if pwm.default_freq_hz == 0 {
            return Err(ConfigError::ValidationError(
                "pwm default_freq_hz must be greater than 0".to_string(),
            ));
        }
        if pwm.default_resolution_bits == 0 || pwm.default_resolution_bits > MAX_RESOLUTION_BITS {
            return Err(ConfigError::ValidationError(format!(
                "pwm default_resolution_bits must be 1..={MAX_RESOLUTION_BITS}"
            )));
        }
        if pwm.min_pulse_us >= pwm.max_pulse_us {
            return Err(ConfigError::ValidationError(
                "pwm min_pulse_us must be below max_pulse_us".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/voicelink/voicelink.toml` or
/// `~/.config/voicelink/voicelink.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("voicelink").join("voicelink.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<VoicelinkConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<VoicelinkConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<VoicelinkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = VoicelinkConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: VoicelinkToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut VoicelinkConfig, toml: &VoicelinkToml) {
    // Server
    if let Some(ref url) = toml.server.url {
        config.link.url.clone_from(url);
    }
    if let Some(ms) = toml.server.reconnect_interval_ms {
        config.link.reconnect_interval = Duration::from_millis(ms);
    }

    // Engine
    if let Some(listen_mode) = toml.engine.listen_mode {
        config.engine.listen_mode = listen_mode;
    }
    if let Some(ms) = toml.engine.audio_drain_ms {
        config.engine.audio_drain = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.engine.capture_settle_ms {
        config.engine.capture_settle = Duration::from_millis(ms);
    }

    // PWM
    let pwm = &mut config.engine.pwm;
    if let Some(channel) = toml.pwm.default_channel {
        pwm.default_channel = channel;
    }
    if let Some(freq) = toml.pwm.default_freq_hz {
        pwm.default_freq_hz = freq;
    }
    if let Some(bits) = toml.pwm.default_resolution_bits {
        pwm.default_resolution_bits = bits;
    }
    if let Some(us) = toml.pwm.min_pulse_us {
        pwm.min_pulse_us = us;
    }
    if let Some(us) = toml.pwm.max_pulse_us {
        pwm.max_pulse_us = us;
    }

    // Fallback clips
    let clips = [
        (FallbackClip::InsufficientQuota, &toml.fallback.insufficient_quota),
        (FallbackClip::CardMissing, &toml.fallback.card_missing),
        (FallbackClip::FeatureDisabled, &toml.fallback.feature_disabled),
    ];
    for (clip, path) in clips {
        if let Some(path) = path {
            config.fallback.insert(clip, path.clone());
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut VoicelinkConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("VOICELINK_URL") {
        config.link.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = env("VOICELINK_RECONNECT_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.link.reconnect_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(listen_mode) = env("VOICELINK_LISTEN_MODE") {
        config.engine.listen_mode = parse_bool(&listen_mode);
        config.source = ConfigSource::Env;
    }
    if let Some(drain) = env("VOICELINK_AUDIO_DRAIN_MS") {
        if let Ok(ms) = drain.parse::<u64>() {
            config.engine.audio_drain = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(settle) = env("VOICELINK_CAPTURE_SETTLE_MS") {
        if let Ok(ms) = settle.parse::<u64>() {
            config.engine.capture_settle = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Server URL override
    pub url: Option<String>,
    /// Listen mode override
    pub listen_mode: Option<bool>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set server URL override
    #[must_use]
    pub fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    /// Set listen mode override
    #[must_use]
    pub fn with_listen_mode(mut self, listen_mode: bool) -> Self {
        self.listen_mode = Some(listen_mode);
        self
    }

    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut VoicelinkConfig) -> Result<(), ConfigError> {
        if self.url.is_some() || self.listen_mode.is_some() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref url) = self.url {
            config.link.url.clone_from(url);
        }
        if let Some(listen_mode) = self.listen_mode {
            config.engine.listen_mode = listen_mode;
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = VoicelinkConfig::default();
        assert_eq!(config.link.url, DEFAULT_SERVER_URL);
        assert_eq!(config.link.reconnect_interval, Duration::from_secs(3));
        assert!(!config.engine.listen_mode);
        assert_eq!(config.engine.audio_drain, Duration::from_millis(300));
        assert_eq!(config.engine.capture_settle, Duration::from_millis(500));
        assert_eq!(config.engine.pwm, PwmConfig::default());
        assert!(config.fallback.is_empty());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("voicelink"));
            assert!(p.to_string_lossy().ends_with("voicelink.toml"));
        }
    }

    #[test]
    fn test_parse_full_toml() {
        let file = write_toml(
            r#"
[server]
url = "wss://voice.example.net/ws"
reconnect_interval_ms = 5000

[engine]
listen_mode = true
audio_drain_ms = 450
capture_settle_ms = 250

[pwm]
default_channel = 3
default_resolution_bits = 12

[fallback]
card_missing = "/opt/clips/card.mp3"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.link.url, "wss://voice.example.net/ws");
        assert_eq!(config.link.reconnect_interval, Duration::from_millis(5000));
        assert!(config.engine.listen_mode);
        assert_eq!(config.engine.audio_drain, Duration::from_millis(450));
        assert_eq!(config.engine.capture_settle, Duration::from_millis(250));
        assert_eq!(config.engine.pwm.default_channel, 3);
        assert_eq!(config.engine.pwm.default_resolution_bits, 12);
        assert_eq!(config.engine.pwm.default_freq_hz, 50);
        assert_eq!(
            config.fallback.get(&FallbackClip::CardMissing),
            Some(&PathBuf::from("/opt/clips/card.mp3"))
        );
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_with_env(
            Some(PathBuf::from("/nonexistent/voicelink/voicelink.toml")),
            no_env,
        )
        .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_toml("[server\nurl = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[server]
url = "ws://from-file:8088"

[engine]
audio_drain_ms = 450
"#,
        );
        let env: HashMap<&str, &str> = [
            ("VOICELINK_URL", "ws://from-env:9000"),
            ("VOICELINK_LISTEN_MODE", "true"),
            ("VOICELINK_CAPTURE_SETTLE_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with_env(Some(file.path().to_path_buf()), |key| {
            env.get(key).map(ToString::to_string)
        })
        .unwrap();

        assert_eq!(config.link.url, "ws://from-env:9000");
        assert!(config.engine.listen_mode);
        // File value survives where env is absent
        assert_eq!(config.engine.audio_drain, Duration::from_millis(450));
        // Unparseable env values are ignored
        assert_eq!(config.engine.capture_settle, Duration::from_millis(500));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let file = write_toml("[server]\nurl = \"http://not-a-websocket\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let file = write_toml("[pwm]\nmin_pulse_us = 3000\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let file = write_toml("[server]\nreconnect_interval_ms = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = VoicelinkConfig::default();
        ConfigOverrides::new()
            .with_url("ws://cli:1234".to_string())
            .with_listen_mode(true)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.link.url, "ws://cli:1234");
        assert!(config.engine.listen_mode);
        assert_eq!(config.source(), ConfigSource::Cli);

        let mut config = VoicelinkConfig::default();
        let result = ConfigOverrides::new()
            .with_url("tcp://nope".to_string())
            .apply(&mut config);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = VoicelinkConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }
}
