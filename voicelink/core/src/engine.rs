//! Protocol Engine
//!
//! The single owner of all protocol state and the single entry point for
//! transport events. The transport hands over one [`TransportEvent`] at a
//! time; the engine classifies it, updates its timelines and drives the
//! device collaborators before returning.
//!
//! # Timelines
//!
//! Three independent timelines are composed here:
//!
//! - **Connection**: [`ConnectionState`], changed only by transport
//!   connect/disconnect events
//! - **Conversation**: [`SessionTracker`], driven by control frames and
//!   terminal binary tags
//! - **Capture**: [`CaptureState`], driven by `session_status` and by the
//!   host through [`Engine::begin_capture`] / [`Engine::end_capture`]
//!
//! Conversation and capture state live in an [`Epoch`] that is replaced
//! wholesale whenever the connection comes up or goes down. The audio
//! caches, the PWM channel table, queued pin reads and the connect-greeting
//! flag belong to the engine and outlive epochs (the caches are cleared
//! explicitly on disconnect).
//!
//! # Timing
//!
//! The engine never blocks. Delays are recorded in the epoch's
//! [`DeferredQueue`]; the host calls [`Engine::poll_deferred`] once
//! [`Engine::next_deadline`] has passed.
//!
//! # Halting
//!
//! `restart` and `sever-close` reboot the device through the platform
//! collaborator. The engine then halts: every later call is a no-op that
//! returns [`Flow::Reboot`], and the host is expected to build a fresh
//! engine.

use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::cache::{AudioCache, CacheSlot};
use crate::capture::CaptureState;
use crate::config::EngineConfig;
use crate::device::{AudioDecoder, Device, NetStatus, Notification, WakeReason};
use crate::events::TransportEvent;
use crate::fallback::FallbackClips;
use crate::frame::{classify_binary, classify_text, BinaryTag, InboundFrame};
use crate::gpio::{PendingPinReads, RemoteIo};
use crate::messages::OutboundMessage;
use crate::scheduler::{DeferredAction, DeferredQueue};
use crate::session::{SessionStatus, SessionTracker};

/// Status reported when the last frame of a reply arrived
pub(crate) const TTS_REAL_END: &str = "tts_real_end";

/// Errors that stop the engine from making progress
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The receiving half of the outbound channel is gone
    #[error("outbound channel closed")]
    OutboundClosed,
}

/// Transport connection state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection (initial state)
    #[default]
    Disconnected,
    /// Connected to the service
    Connected,
}

/// What the host should do after an engine call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep feeding events
    Continue,
    /// The device rebooted; drop this engine and start over
    Reboot,
}

/// State that lives exactly as long as one connection
#[derive(Clone, Debug, Default)]
pub struct Epoch {
    pub(crate) session: SessionTracker,
    pub(crate) capture: CaptureState,
    pub(crate) deferred: DeferredQueue,
}

impl Epoch {
    /// Conversation state
    #[must_use]
    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// Capture state
    #[must_use]
    pub fn capture(&self) -> &CaptureState {
        &self.capture
    }

    /// Pending deferred actions
    #[must_use]
    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }
}

/// The protocol engine
#[derive(Debug)]
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) device: Device,
    pub(crate) fallback: FallbackClips,
    pub(crate) outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub(crate) connection: ConnectionState,
    pub(crate) epoch: Epoch,
    pub(crate) cache: AudioCache,
    pub(crate) io: RemoteIo,
    pub(crate) played_connect_greeting: bool,
    pub(crate) halted: bool,
}

impl Engine {
    /// Create an engine in the disconnected state
    #[must_use]
    pub fn new(
        config: EngineConfig,
        device: Device,
        fallback: FallbackClips,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let io = RemoteIo::new(config.pwm.clone());
        Self {
            config,
            device,
            fallback,
            outbound,
            connection: ConnectionState::Disconnected,
            epoch: Epoch::default(),
            cache: AudioCache::new(),
            io,
            played_connect_greeting: false,
            halted: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Engine settings
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current connection state
    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Current epoch
    #[must_use]
    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Conversation state of the current epoch
    #[must_use]
    pub fn session(&self) -> &SessionTracker {
        &self.epoch.session
    }

    /// Capture state of the current epoch
    #[must_use]
    pub fn capture(&self) -> &CaptureState {
        &self.epoch.capture
    }

    /// Audio caches
    #[must_use]
    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Remote I/O proxy state
    #[must_use]
    pub fn remote_io(&self) -> &RemoteIo {
        &self.io
    }

    /// Queued pin reads, for the host's poller to drain
    pub fn pending_reads_mut(&mut self) -> &mut PendingPinReads {
        self.io.pending_mut()
    }

    /// Whether the connect greeting has played since boot
    #[must_use]
    pub fn played_connect_greeting(&self) -> bool {
        self.played_connect_greeting
    }

    /// Whether a reboot halted this engine
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// When [`Self::poll_deferred`] should next be called
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.halted {
            return None;
        }
        self.epoch.deferred.next_deadline()
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Process one transport event
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OutboundClosed`] if a reply could not be queued.
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
    ) -> Result<Flow, EngineError> {
        if self.halted {
            tracing::debug!(event = event.kind(), "Engine halted, ignoring event");
            return Ok(Flow::Reboot);
        }

        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected => {
                self.on_disconnected();
                Ok(Flow::Continue)
            }
            TransportEvent::Text(text) => match classify_text(&text) {
                Ok(InboundFrame::SessionEnd) => {
                    self.on_session_end();
                    Ok(Flow::Continue)
                }
                Ok(InboundFrame::Command(command)) => self.dispatch(command, now),
                Ok(InboundFrame::Audio { .. }) => Ok(Flow::Continue),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed control frame");
                    Ok(Flow::Continue)
                }
            },
            TransportEvent::Binary(data) => match classify_binary(&data) {
                Ok(InboundFrame::Audio { tag, payload }) => self.on_audio(tag, payload, now),
                Ok(_) => Ok(Flow::Continue),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed binary frame");
                    Ok(Flow::Continue)
                }
            },
            TransportEvent::Error(message) => {
                tracing::warn!(error = %message, "Transport error");
                Ok(Flow::Continue)
            }
        }
    }

    /// Run every deferred action due at `now`
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature matches [`Self::handle_event`].
    pub fn poll_deferred(&mut self, now: Instant) -> Result<Flow, EngineError> {
        if self.halted {
            return Ok(Flow::Reboot);
        }

        for action in self.epoch.deferred.take_due(now) {
            match action {
                DeferredAction::ResumeListening { after_task } => {
                    if self.epoch.capture.is_guarded() {
                        tracing::debug!("Capture already running, skipping resume");
                        continue;
                    }
                    tracing::info!(
                        after_task = after_task.as_ref().map_or("", |t| t.0.as_str()),
                        "Reply drained, resuming listening"
                    );
                    self.device.platform.wake_up(WakeReason::Continue);
                }
                DeferredAction::SettleCapture => self.epoch.capture.settle(),
            }
        }
        Ok(Flow::Continue)
    }

    /// The device started capturing locally
    pub fn begin_capture(&mut self) {
        if self.epoch.deferred.cancel_resume().is_some() {
            tracing::debug!("Local capture started, pending resume cancelled");
        }
        if self.epoch.deferred.cancel_settle() {
            tracing::debug!("Local capture started, pending settle cancelled");
        }
        self.epoch.capture.begin_local();
    }

    /// The device stopped capturing locally
    pub fn end_capture(&mut self) {
        self.epoch.capture.end_local();
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    fn on_connected(&mut self) -> Result<Flow, EngineError> {
        if self.connection == ConnectionState::Connected {
            tracing::warn!("Connected again without a disconnect, resetting first");
            self.on_disconnected();
        }
        tracing::info!("Connected to voice service");
        self.epoch = Epoch::default();
        self.connection = ConnectionState::Connected;
        self.send(OutboundMessage::PlaybackReady)?;
        self.notify(Notification::NetStatus(NetStatus::Connected));
        Ok(Flow::Continue)
    }

    fn on_disconnected(&mut self) {
        if self.connection != ConnectionState::Connected {
            tracing::debug!("Disconnect while not connected, ignoring");
            return;
        }
        tracing::warn!("Disconnected from voice service");
        self.epoch = Epoch::default();
        self.cache.clear();
        self.connection = ConnectionState::Disconnected;
        self.notify(Notification::NetStatus(NetStatus::Disconnected));
    }

    // ========================================================================
    // Session End
    // ========================================================================

    fn on_session_end(&mut self) {
        let sleep_reply = self.cache.get(CacheSlot::SleepReply);
        if !self.config.listen_mode && self.epoch.session.has_session() && !sleep_reply.is_empty()
        {
            tracing::debug!(len = sleep_reply.len(), "Playing cached sleep reply");
            begin_decoder(self.device.decoder.as_mut());
            play(self.device.decoder.as_mut(), sleep_reply);
        }

        self.epoch.deferred.cancel_resume();
        self.epoch.session.end();
        self.epoch.capture.session_ended();
        tracing::info!("Session ended");
    }

    // ========================================================================
    // Binary Frames
    // ========================================================================

    fn on_audio(
        &mut self,
        tag: BinaryTag,
        payload: &[u8],
        now: Instant,
    ) -> Result<Flow, EngineError> {
        let mut write = false;
        match &tag {
            BinaryTag::ReplyContinue => self.on_reply_continue(now)?,
            BinaryTag::ReplyEnd => self.on_reply_end()?,
            BinaryTag::ChunkEnd => {
                tracing::debug!("TTS chunk finished");
                self.epoch.session.take_task();
            }
            BinaryTag::CacheFill(slot) => self.cache.append(*slot, payload),
            BinaryTag::Beep => write = true,
            BinaryTag::ConnectGreeting => write = !self.played_connect_greeting,
            BinaryTag::Session(id) => {
                write = self.epoch.session.is_current(id);
                if !write {
                    tracing::debug!(tag = %id, len = payload.len(), "Dropping stale session audio");
                }
            }
        }

        if write {
            play(self.device.decoder.as_mut(), payload);
        }
        self.epoch.session.record_tag(tag);
        Ok(Flow::Continue)
    }

    fn on_reply_continue(&mut self, now: Instant) -> Result<(), EngineError> {
        let finished = self.epoch.session.take_task();
        self.epoch.session.set_status(SessionStatus::Idle);

        if !self.epoch.session.has_session() {
            tracing::debug!("Reply finished outside a session");
            return Ok(());
        }

        self.send(OutboundMessage::AudioOver {
            session_id: BinaryTag::ReplyContinue.as_wire().to_string(),
            tts_task_id: finished.as_ref().map(|t| t.0.clone()).unwrap_or_default(),
        })?;
        self.notify(Notification::SessionStatus(TTS_REAL_END.to_string()));

        if self.config.listen_mode {
            tracing::debug!("Reply finished, listen mode keeps the microphone closed");
        } else {
            tracing::debug!("Reply finished, conversation continues");
            self.epoch.deferred.schedule(
                now + self.config.audio_drain,
                DeferredAction::ResumeListening {
                    after_task: finished,
                },
            );
        }
        Ok(())
    }

    fn on_reply_end(&mut self) -> Result<(), EngineError> {
        if !self.played_connect_greeting
            && self.epoch.session.previous_tag() == Some(&BinaryTag::ConnectGreeting)
        {
            tracing::debug!("Connect greeting finished playing");
            self.played_connect_greeting = true;
        }

        let finished = self.epoch.session.take_task();
        self.send(OutboundMessage::AudioOver {
            session_id: BinaryTag::ReplyEnd.as_wire().to_string(),
            tts_task_id: finished.map(|t| t.0).unwrap_or_default(),
        })?;
        self.epoch.session.set_status(SessionStatus::Idle);
        self.epoch.capture.reply_finished();
        self.notify(Notification::SessionStatus(TTS_REAL_END.to_string()));
        tracing::debug!("Reply finished, conversation over");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Queue an outbound frame
    pub(crate) fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        self.outbound
            .send(message)
            .map_err(|_| EngineError::OutboundClosed)
    }

    /// Deliver a notification to the host
    pub(crate) fn notify(&mut self, notification: Notification) {
        self.device.sink.notify(notification);
    }

    /// Close the current playback stream and open a fresh one
    pub(crate) fn restart_decoder(&mut self) {
        end_decoder(self.device.decoder.as_mut());
        begin_decoder(self.device.decoder.as_mut());
    }

    /// Reboot the device and halt
    pub(crate) fn reboot(&mut self) -> Flow {
        self.device.platform.reboot();
        self.halted = true;
        Flow::Reboot
    }
}

pub(crate) fn begin_decoder(decoder: &mut dyn AudioDecoder) {
    if let Err(e) = decoder.begin() {
        tracing::warn!(error = %e, "Decoder begin failed");
    }
}

pub(crate) fn end_decoder(decoder: &mut dyn AudioDecoder) {
    if let Err(e) = decoder.end() {
        tracing::warn!(error = %e, "Decoder end failed");
    }
}

/// Write audio if the decoder is ready; returns whether it was written
pub(crate) fn play(decoder: &mut dyn AudioDecoder, bytes: &[u8]) -> bool {
    if !decoder.is_ready() {
        tracing::debug!(len = bytes.len(), "Decoder not ready, dropping audio");
        return false;
    }
    if let Err(e) = decoder.write(bytes) {
        tracing::warn!(error = %e, len = bytes.len(), "Decoder write failed");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{DecoderCall, SimulatedDevice};
    use pretty_assertions::assert_eq;

    fn engine() -> (
        Engine,
        SimulatedDevice,
        mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = SimulatedDevice::new();
        let engine = Engine::new(
            EngineConfig::default(),
            device.device(),
            FallbackClips::new(),
            tx,
        );
        (engine, device, rx)
    }

    #[test]
    fn test_connect_announces_playback() {
        let (mut engine, device, mut rx) = engine();
        let flow = engine
            .handle_event(TransportEvent::Connected, Instant::now())
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(engine.connection(), ConnectionState::Connected);
        assert_eq!(rx.try_recv().unwrap(), OutboundMessage::PlaybackReady);
        assert_eq!(
            device.take_notifications(),
            vec![Notification::NetStatus(NetStatus::Connected)]
        );
    }

    #[test]
    fn test_disconnect_without_connect_is_ignored() {
        let (mut engine, device, _rx) = engine();
        engine
            .handle_event(TransportEvent::Disconnected, Instant::now())
            .unwrap();
        assert!(device.take_notifications().is_empty());
    }

    #[test]
    fn test_closed_outbound_channel() {
        let (mut engine, _device, rx) = engine();
        drop(rx);
        assert_eq!(
            engine.handle_event(TransportEvent::Connected, Instant::now()),
            Err(EngineError::OutboundClosed)
        );
    }

    #[test]
    fn test_transport_error_changes_nothing() {
        let (mut engine, device, _rx) = engine();
        engine
            .handle_event(TransportEvent::Error("reset by peer".to_string()), Instant::now())
            .unwrap();
        assert_eq!(engine.connection(), ConnectionState::Disconnected);
        assert!(device.take_notifications().is_empty());
    }

    #[test]
    fn test_beep_plays_without_session() {
        let (mut engine, device, _rx) = engine();
        engine
            .handle_event(TransportEvent::Binary(b"0000beep".to_vec()), Instant::now())
            .unwrap();
        assert_eq!(
            device.state().decoder_calls,
            vec![DecoderCall::Write(b"beep".to_vec())]
        );
    }

    #[test]
    fn test_decoder_not_ready_drops_audio() {
        let (mut engine, device, _rx) = engine();
        device.state().decoder_ready = false;
        engine
            .handle_event(TransportEvent::Binary(b"0000beep".to_vec()), Instant::now())
            .unwrap();
        assert!(device.state().decoder_calls.is_empty());
        assert_eq!(engine.session().previous_tag(), Some(&BinaryTag::Beep));
    }

    #[test]
    fn test_settle_clears_capturing() {
        let (mut engine, _device, _rx) = engine();
        let start = Instant::now();
        engine.begin_capture();
        engine
            .handle_event(
                TransportEvent::Text(r#"{"type":"session_status","status":"iat_end"}"#.to_string()),
                start,
            )
            .unwrap();
        assert!(engine.capture().is_capturing());
        assert_eq!(
            engine.next_deadline(),
            Some(start + engine.config().capture_settle)
        );

        engine.poll_deferred(start + engine.config().capture_settle).unwrap();
        assert!(!engine.capture().is_capturing());
        assert_eq!(engine.next_deadline(), None);
    }
}
