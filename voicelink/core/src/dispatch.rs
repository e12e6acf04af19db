//! Command Dispatch
//!
//! One handler per [`ServerCommand`] variant. Handlers run to completion
//! before the next event is delivered; collaborator failures are logged and
//! never abort the frame.

use std::time::Instant;

use serde_json::Value;

use crate::device::{ErrorReport, Notification};
use crate::engine::{end_decoder, play, Engine, EngineError, Flow};
use crate::fallback::FallbackClip;
use crate::gpio::{HardwareCommand, HardwareError};
use crate::messages::{OutboundMessage, ServerCommand};
use crate::scheduler::DeferredAction;
use crate::session::SessionStatus;

/// Error code reported for authentication failures
const AUTH_FAIL_CODE: &str = "002";

impl Engine {
    /// Route one control command
    pub(crate) fn dispatch(
        &mut self,
        command: ServerCommand,
        now: Instant,
    ) -> Result<Flow, EngineError> {
        tracing::trace!(command = command.name(), "Dispatching control frame");

        match command {
            ServerCommand::ClockProbe { stc_time } => {
                self.send(OutboundMessage::ClockEcho { stc_time })?;
            }
            ServerCommand::NetDelay { net_delay } => {
                tracing::debug!(net_delay_ms = ?net_delay, "Network delay reported");
            }
            ServerCommand::Instruct { command_id, data } => {
                tracing::debug!(%command_id, "Instruction received");
                self.notify(Notification::Instruction { command_id, data });
            }
            ServerCommand::PlayAudio {
                tts_task_id,
                session_id,
            } => self.on_play_audio(&tts_task_id, &session_id),
            ServerCommand::SessionStart { session_id } => self.on_session_start(&session_id),
            ServerCommand::SessionStop => self.on_session_stop(),
            ServerCommand::SessionStatus { status } => self.on_session_status(status, now),
            ServerCommand::AuthFail { message, code } => {
                tracing::warn!(%code, %message, "Authentication failed");
                self.notify(Notification::Error(ErrorReport::new(
                    AUTH_FAIL_CODE,
                    "auth",
                    message,
                )));
            }
            ServerCommand::Error { code, at, message } => self.on_error(code, at, message),
            ServerCommand::SetWifiConfig { configs } => self.on_set_wifi_config(&configs)?,
            ServerCommand::Restart => {
                tracing::warn!("Server requested restart");
                return Ok(self.reboot());
            }
            ServerCommand::ClearCache => {
                tracing::info!(bytes = self.cache.total_len(), "Clearing audio caches");
                self.cache.clear();
            }
            ServerCommand::SetLocalData { field, value } => {
                if let Err(e) = self.device.store.set(&field, &value) {
                    tracing::warn!(%field, error = %e, "Failed to store local data");
                }
            }
            ServerCommand::Log { data } => {
                tracing::info!(server_log = %data, "Server log");
            }
            ServerCommand::ServerClose => {
                tracing::warn!("Server closed the connection for good, rebooting");
                return Ok(self.reboot());
            }
            ServerCommand::HardwareFns(hardware) => self.on_hardware(&hardware),
            ServerCommand::Emotion { data } => {
                self.notify(Notification::Emotion(data));
            }
            ServerCommand::Unknown => {
                tracing::debug!("Ignoring unknown control frame");
            }
        }

        Ok(Flow::Continue)
    }

    fn on_play_audio(&mut self, tts_task_id: &str, session_id: &str) {
        if self.epoch.deferred.cancel_resume().is_some() {
            tracing::debug!("New reply started, pending resume cancelled");
        }

        if self.epoch.capture.is_guarded() {
            // Local capture wins over server playback
            tracing::debug!(tts_task_id, "Capturing, ignoring play_audio");
            self.epoch.session.assign_task("");
            return;
        }

        self.restart_decoder();
        self.epoch.session.assign_task(tts_task_id);
        tracing::debug!(tts_task_id, session_id, "TTS task started");
    }

    fn on_session_start(&mut self, session_id: &str) {
        self.epoch.deferred.cancel_resume();
        self.epoch.session.start(session_id);
        tracing::info!(session_id, "Session started");
    }

    fn on_session_stop(&mut self) {
        self.epoch.deferred.cancel_resume();

        if self.epoch.capture.is_guarded() {
            tracing::debug!("Session stopped while capturing");
            self.epoch.session.end();
            return;
        }

        end_decoder(self.device.decoder.as_mut());
        self.epoch.session.stop();
        tracing::info!("Session stopped");
    }

    fn on_session_status(&mut self, status: String, now: Instant) {
        match SessionStatus::from_wire(&status) {
            Some(SessionStatus::ListeningStart) => {
                self.epoch.capture.recognition_started();
                self.epoch.session.set_status(SessionStatus::ListeningStart);
            }
            Some(SessionStatus::ListeningEnd) => {
                self.epoch.capture.recognition_ended();
                self.epoch.session.set_status(SessionStatus::ListeningEnd);
                self.epoch.deferred.schedule(
                    now + self.config.capture_settle,
                    DeferredAction::SettleCapture,
                );
            }
            _ => {}
        }
        tracing::debug!(%status, "Session status");
        self.notify(Notification::SessionStatus(status));
    }

    fn on_error(&mut self, code: String, at: String, message: String) {
        tracing::warn!(%code, %at, %message, "Service error");

        if let Some(clip) = FallbackClip::from_code(&code) {
            self.restart_decoder();
            match self.fallback.get(clip) {
                Some(bytes) => {
                    play(self.device.decoder.as_mut(), bytes);
                }
                None => tracing::warn!(?clip, "No fallback clip loaded"),
            }
        }

        self.notify(Notification::Error(ErrorReport { code, at, message }));
    }

    fn on_set_wifi_config(&mut self, configs: &Value) -> Result<(), EngineError> {
        let success = match self.device.wifi.apply(configs) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(error = %e, "WiFi configuration failed");
                false
            }
        };
        self.send(OutboundMessage::WifiConfigResult { success })
    }

    fn on_hardware(&mut self, hardware: &HardwareCommand) {
        match self.io.apply(hardware, self.device.pins.as_mut()) {
            Ok(op) => tracing::debug!(?op, "Hardware operation applied"),
            Err(HardwareError::Device(e)) => {
                tracing::warn!(error = %e, fn_name = %hardware.fn_name, "Pin driver failed");
            }
            Err(e) => {
                tracing::debug!(error = %e, fn_name = %hardware.fn_name, "Ignoring hardware request");
            }
        }
    }
}
