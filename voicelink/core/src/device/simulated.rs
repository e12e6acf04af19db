//! Simulated Device
//!
//! An in-memory device that records every collaborator call. The daemon
//! runs against it when no real hardware is attached, and the test suite
//! uses it to observe what the engine did.
//!
//! Cloning a [`SimulatedDevice`] shares the same recorded state, so a test
//! can hand one clone to the engine and keep another to inspect.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use super::{
    AudioDecoder, Device, DeviceError, LocalStore, Notification, NotificationSink, PinDriver,
    Platform, WakeReason, WifiConfigurator,
};
use crate::gpio::{Level, PinMode, PwmChannel};

/// One recorded decoder call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecoderCall {
    /// `begin`
    Begin,
    /// `write` with the bytes written
    Write(Vec<u8>),
    /// `end`
    End,
}

/// One recorded pin call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinCall {
    /// `set_mode`
    SetMode {
        /// Pin
        pin: u32,
        /// Mode
        mode: PinMode,
    },
    /// `configure_pwm`
    ConfigurePwm {
        /// Channel
        channel: u8,
        /// Settings
        pwm: PwmChannel,
    },
    /// `attach_pwm`
    AttachPwm {
        /// Pin
        pin: u32,
        /// Channel
        channel: u8,
    },
    /// `digital_write`
    DigitalWrite {
        /// Pin
        pin: u32,
        /// Level
        level: Level,
    },
    /// `analog_write`
    AnalogWrite {
        /// Pin
        pin: u32,
        /// Duty
        duty: i64,
    },
    /// `pwm_write`
    PwmWrite {
        /// Channel
        channel: u8,
        /// Duty
        duty: u32,
    },
}

/// Everything the simulated device has seen
#[derive(Debug)]
pub struct SimulatedState {
    /// Decoder calls in order
    pub decoder_calls: Vec<DecoderCall>,
    /// Whether the decoder reports ready
    pub decoder_ready: bool,
    /// Pin calls in order
    pub pin_calls: Vec<PinCall>,
    /// Persisted key-value pairs
    pub store: BTreeMap<String, String>,
    /// WiFi configurations received
    pub wifi_configs: Vec<Value>,
    /// What the configurator answers
    pub wifi_accepts: bool,
    /// Number of reboot requests
    pub reboots: usize,
    /// Wake-up requests in order
    pub wake_ups: Vec<WakeReason>,
    /// Notifications in order
    pub notifications: Vec<Notification>,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            decoder_calls: Vec::new(),
            decoder_ready: true,
            pin_calls: Vec::new(),
            store: BTreeMap::new(),
            wifi_configs: Vec::new(),
            wifi_accepts: true,
            reboots: 0,
            wake_ups: Vec::new(),
            notifications: Vec::new(),
        }
    }
}

impl SimulatedState {
    /// Concatenation of every decoder write
    #[must_use]
    pub fn decoded_bytes(&self) -> Vec<u8> {
        self.decoder_calls
            .iter()
            .filter_map(|call| match call {
                DecoderCall::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Number of decoder writes
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.decoder_calls
            .iter()
            .filter(|call| matches!(call, DecoderCall::Write(_)))
            .count()
    }
}

/// Shared-state device double
#[derive(Clone, Debug, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedDevice {
    /// Create a fresh device
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle clones of this device as engine collaborators
    #[must_use]
    pub fn device(&self) -> Device {
        Device {
            decoder: Box::new(self.clone()),
            pins: Box::new(self.clone()),
            store: Box::new(self.clone()),
            wifi: Box::new(self.clone()),
            platform: Box::new(self.clone()),
            sink: Box::new(self.clone()),
        }
    }

    /// Lock the recorded state
    #[must_use]
    pub fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock()
    }

    /// Drain recorded notifications
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.state.lock().notifications)
    }

    /// Forget all recorded calls, keeping configured behaviour
    pub fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.decoder_calls.clear();
        state.pin_calls.clear();
        state.notifications.clear();
        state.wake_ups.clear();
    }
}

impl AudioDecoder for SimulatedDevice {
    fn begin(&mut self) -> Result<(), DeviceError> {
        tracing::trace!("decoder begin");
        self.state.lock().decoder_calls.push(DecoderCall::Begin);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        tracing::trace!(len = data.len(), "decoder write");
        self.state
            .lock()
            .decoder_calls
            .push(DecoderCall::Write(data.to_vec()));
        Ok(())
    }

    fn end(&mut self) -> Result<(), DeviceError> {
        tracing::trace!("decoder end");
        self.state.lock().decoder_calls.push(DecoderCall::End);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state.lock().decoder_ready
    }
}

impl PinDriver for SimulatedDevice {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), DeviceError> {
        tracing::info!(pin, ?mode, "pin mode");
        self.state.lock().pin_calls.push(PinCall::SetMode { pin, mode });
        Ok(())
    }

    fn configure_pwm(&mut self, channel: u8, pwm: PwmChannel) -> Result<(), DeviceError> {
        tracing::info!(
            channel,
            freq_hz = pwm.freq_hz,
            resolution_bits = pwm.resolution_bits,
            "pwm setup"
        );
        self.state
            .lock()
            .pin_calls
            .push(PinCall::ConfigurePwm { channel, pwm });
        Ok(())
    }

    fn attach_pwm(&mut self, pin: u32, channel: u8) -> Result<(), DeviceError> {
        tracing::info!(pin, channel, "pwm attach");
        self.state
            .lock()
            .pin_calls
            .push(PinCall::AttachPwm { pin, channel });
        Ok(())
    }

    fn digital_write(&mut self, pin: u32, level: Level) -> Result<(), DeviceError> {
        tracing::info!(pin, ?level, "digital write");
        self.state
            .lock()
            .pin_calls
            .push(PinCall::DigitalWrite { pin, level });
        Ok(())
    }

    fn analog_write(&mut self, pin: u32, duty: i64) -> Result<(), DeviceError> {
        tracing::info!(pin, duty, "analog write");
        self.state
            .lock()
            .pin_calls
            .push(PinCall::AnalogWrite { pin, duty });
        Ok(())
    }

    fn pwm_write(&mut self, channel: u8, duty: u32) -> Result<(), DeviceError> {
        tracing::info!(channel, duty, "pwm write");
        self.state
            .lock()
            .pin_calls
            .push(PinCall::PwmWrite { channel, duty });
        Ok(())
    }
}

impl LocalStore for SimulatedDevice {
    fn set(&mut self, field: &str, value: &str) -> Result<(), DeviceError> {
        if field.is_empty() {
            return Err(DeviceError::Store("empty field name".to_string()));
        }
        tracing::info!(field, "local data stored");
        self.state
            .lock()
            .store
            .insert(field.to_string(), value.to_string());
        Ok(())
    }
}

impl WifiConfigurator for SimulatedDevice {
    fn apply(&mut self, configs: &Value) -> Result<bool, DeviceError> {
        let mut state = self.state.lock();
        state.wifi_configs.push(configs.clone());
        tracing::info!(accepted = state.wifi_accepts, "wifi configuration received");
        Ok(state.wifi_accepts)
    }
}

impl Platform for SimulatedDevice {
    fn reboot(&mut self) {
        tracing::warn!("device reboot requested");
        self.state.lock().reboots += 1;
    }

    fn wake_up(&mut self, reason: WakeReason) {
        tracing::info!(reason = reason.as_str(), "wake up");
        self.state.lock().wake_ups.push(reason);
    }
}

impl NotificationSink for SimulatedDevice {
    fn notify(&mut self, notification: Notification) {
        tracing::debug!(?notification, "notification");
        self.state.lock().notifications.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let device = SimulatedDevice::new();
        let mut bundle = device.device();

        bundle.decoder.begin().unwrap();
        bundle.decoder.write(b"ab").unwrap();
        bundle.decoder.write(b"c").unwrap();
        bundle.decoder.end().unwrap();

        let state = device.state();
        assert_eq!(state.decoded_bytes(), b"abc");
        assert_eq!(state.write_count(), 2);
        assert_eq!(state.decoder_calls.first(), Some(&DecoderCall::Begin));
        assert_eq!(state.decoder_calls.last(), Some(&DecoderCall::End));
    }

    #[test]
    fn test_store_rejects_empty_field() {
        let device = SimulatedDevice::new();
        let mut bundle = device.device();
        assert!(bundle.store.set("", "x").is_err());
        bundle.store.set("volume", "7").unwrap();
        assert_eq!(device.state().store.get("volume").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_take_notifications_drains() {
        let device = SimulatedDevice::new();
        let mut bundle = device.device();
        bundle.sink.notify(Notification::Emotion("happy".to_string()));

        assert_eq!(device.take_notifications().len(), 1);
        assert!(device.take_notifications().is_empty());
    }
}
