//! Session and TTS Task Tracking
//!
//! Tracks the conversation side of the protocol: which session the server
//! considers active, which TTS task is currently streaming, and which binary
//! tag was seen last.
//!
//! # Design Philosophy
//!
//! There is no per-frame handshake. Audio frames carry only a short tag, so
//! the tracker is the single place that decides whether a tagged frame
//! belongs to the live conversation. Everything here is reset together when
//! a connection epoch ends.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::BinaryTag;

/// Server-issued session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-issued TTS task identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtsTaskId(pub String);

impl fmt::Display for TtsTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation status as seen by the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Nothing in flight
    #[default]
    Idle,
    /// The server started recognising speech (`iat_start`)
    ListeningStart,
    /// The server finished recognising speech (`iat_end`)
    ListeningEnd,
    /// The session was stopped or ended
    Stopped,
}

impl SessionStatus {
    /// Map a `session_status` wire literal, if it is one the engine tracks
    #[must_use]
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "iat_start" => Some(Self::ListeningStart),
            "iat_end" => Some(Self::ListeningEnd),
            _ => None,
        }
    }
}

/// Per-epoch session state
#[derive(Clone, Debug, Default)]
pub struct SessionTracker {
    session: Option<SessionId>,
    status: SessionStatus,
    task: Option<TtsTaskId>,
    previous_tag: Option<BinaryTag>,
}

impl SessionTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active session, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Whether a session is active
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a session tag names the active session
    #[must_use]
    pub fn is_current(&self, tag: &str) -> bool {
        self.session.as_ref().is_some_and(|id| id.0 == tag)
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Current TTS task, if any
    #[must_use]
    pub fn task_id(&self) -> Option<&TtsTaskId> {
        self.task.as_ref()
    }

    /// The last binary tag processed (including dropped ones)
    #[must_use]
    pub fn previous_tag(&self) -> Option<&BinaryTag> {
        self.previous_tag.as_ref()
    }

    /// A new session began; replaces any previous one
    ///
    /// An empty id means "no session".
    pub fn start(&mut self, id: &str) {
        self.session = (!id.is_empty()).then(|| SessionId(id.to_string()));
    }

    /// Forget the active session without touching the task
    pub fn clear_session(&mut self) {
        self.session = None;
    }

    /// The server stopped the session
    pub fn stop(&mut self) {
        self.session = None;
        self.status = SessionStatus::Stopped;
    }

    /// The session ended: forget session and task
    pub fn end(&mut self) {
        self.session = None;
        self.task = None;
        self.status = SessionStatus::Stopped;
    }

    /// Set the status
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Track a new TTS task; an empty id clears the task
    pub fn assign_task(&mut self, id: &str) {
        self.task = (!id.is_empty()).then(|| TtsTaskId(id.to_string()));
    }

    /// Forget the current task, returning it
    pub fn take_task(&mut self) -> Option<TtsTaskId> {
        self.task.take()
    }

    /// Remember the tag of the frame just handled
    pub fn record_tag(&mut self, tag: BinaryTag) {
        self.previous_tag = Some(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_match() {
        let mut tracker = SessionTracker::new();
        assert!(!tracker.has_session());
        assert!(!tracker.is_current("0042"));

        tracker.start("0042");
        assert!(tracker.has_session());
        assert!(tracker.is_current("0042"));
        assert!(!tracker.is_current("0043"));
    }

    #[test]
    fn test_empty_ids_mean_none() {
        let mut tracker = SessionTracker::new();
        tracker.start("");
        tracker.assign_task("");
        assert!(tracker.session_id().is_none());
        assert!(tracker.task_id().is_none());
    }

    #[test]
    fn test_end_clears_session_and_task() {
        let mut tracker = SessionTracker::new();
        tracker.start("7781");
        tracker.assign_task("task-1");
        tracker.end();

        assert!(tracker.session_id().is_none());
        assert!(tracker.task_id().is_none());
        assert_eq!(tracker.status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_stop_keeps_task() {
        let mut tracker = SessionTracker::new();
        tracker.start("7781");
        tracker.assign_task("task-1");
        tracker.stop();

        assert!(tracker.session_id().is_none());
        assert_eq!(tracker.task_id(), Some(&TtsTaskId("task-1".to_string())));
    }

    #[test]
    fn test_status_literals() {
        assert_eq!(
            SessionStatus::from_wire("iat_start"),
            Some(SessionStatus::ListeningStart)
        );
        assert_eq!(
            SessionStatus::from_wire("iat_end"),
            Some(SessionStatus::ListeningEnd)
        );
        assert_eq!(SessionStatus::from_wire("llm_start"), None);
    }
}
