//! Local Capture State
//!
//! The microphone timeline, kept apart from the conversation timeline in
//! [`crate::session`]. The engine composes the two through a small number of
//! explicit rules, the main one being that an active capture guard
//! suppresses playback of new server audio.

/// Flags describing what the microphone side is doing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureState {
    /// Microphone is capturing; new TTS playback must not start
    guard: bool,
    /// Captured audio is being streamed upstream
    send_guard: bool,
    /// The server has started recognising this utterance
    inference_started: bool,
    /// The recogniser is mid-utterance (cleared after the settle delay)
    capturing: bool,
}

impl CaptureState {
    /// Create an idle capture state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the capture guard is set
    #[must_use]
    pub fn is_guarded(&self) -> bool {
        self.guard
    }

    /// Whether captured audio is flowing upstream
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.send_guard
    }

    /// Whether the server has begun recognition
    #[must_use]
    pub fn inference_started(&self) -> bool {
        self.inference_started
    }

    /// Whether an utterance is in progress
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// The device started capturing locally (wake word, button, resume)
    pub fn begin_local(&mut self) {
        self.guard = true;
        self.capturing = true;
    }

    /// The device stopped capturing locally
    pub fn end_local(&mut self) {
        self.guard = false;
        self.send_guard = false;
    }

    /// Server reported `iat_start`
    pub fn recognition_started(&mut self) {
        self.guard = true;
        self.send_guard = true;
        self.inference_started = true;
    }

    /// Server reported `iat_end`; `capturing` stays set until [`Self::settle`]
    pub fn recognition_ended(&mut self) {
        self.guard = false;
        self.send_guard = false;
        self.inference_started = false;
    }

    /// The settle delay after `iat_end` elapsed
    pub fn settle(&mut self) {
        self.capturing = false;
    }

    /// The reply stream finished; recognition of this turn is over
    pub fn reply_finished(&mut self) {
        self.inference_started = false;
    }

    /// The session ended
    pub fn session_ended(&mut self) {
        self.inference_started = false;
        self.capturing = false;
    }
}
