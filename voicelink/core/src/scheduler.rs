//! Deferred Actions
//!
//! Timed follow-ups that must not block event delivery. The engine never
//! sleeps: it records what should happen and when, and the host calls
//! [`crate::Engine::poll_deferred`] once [`DeferredQueue::next_deadline`]
//! has passed.
//!
//! Two actions exist:
//!
//! - **Resume listening** after a `2000` reply, once queued audio has had
//!   time to drain. At most one is pending; it is keyed to the task that
//!   just finished and is cancelled when newer conversation events arrive.
//! - **Settle capture** after `iat_end`, clearing the capturing flag. A
//!   new local capture cancels it.

use std::time::Instant;

use crate::session::TtsTaskId;

/// An action waiting for its deadline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferredAction {
    /// Reopen the microphone for the next turn
    ResumeListening {
        /// The task whose reply just drained
        after_task: Option<TtsTaskId>,
    },
    /// Mark the utterance as fully captured
    SettleCapture,
}

#[derive(Clone, Debug)]
struct Entry {
    due: Instant,
    action: DeferredAction,
}

/// Pending deferred actions, ordered by deadline on extraction
#[derive(Clone, Debug, Default)]
pub struct DeferredQueue {
    entries: Vec<Entry>,
}

impl DeferredQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an action
    ///
    /// A new resume replaces any pending resume; a new settle replaces any
    /// pending settle.
    pub fn schedule(&mut self, due: Instant, action: DeferredAction) {
        let same_kind = std::mem::discriminant(&action);
        self.entries
            .retain(|entry| std::mem::discriminant(&entry.action) != same_kind);
        self.entries.push(Entry { due, action });
    }

    /// Cancel a pending resume, returning the task it was keyed to
    pub fn cancel_resume(&mut self) -> Option<Option<TtsTaskId>> {
        let idx = self
            .entries
            .iter()
            .position(|entry| matches!(entry.action, DeferredAction::ResumeListening { .. }))?;
        match self.entries.remove(idx).action {
            DeferredAction::ResumeListening { after_task } => Some(after_task),
            DeferredAction::SettleCapture => None,
        }
    }

    /// Cancel a pending settle; returns whether one was pending
    pub fn cancel_settle(&mut self) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.action != DeferredAction::SettleCapture);
        self.entries.len() != before
    }

    /// Whether a resume is pending
    #[must_use]
    pub fn has_pending_resume(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry.action, DeferredAction::ResumeListening { .. }))
    }

    /// Earliest deadline, if anything is pending
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.due).min()
    }

    /// Remove and return every action due at `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<DeferredAction> {
        let mut due: Vec<Entry> = Vec::new();
        let mut idx = 0;
        while idx < self.entries.len() {
            if self.entries[idx].due <= now {
                due.push(self.entries.swap_remove(idx));
            } else {
                idx += 1;
            }
        }
        due.sort_by_key(|entry| entry.due);
        due.into_iter().map(|entry| entry.action).collect()
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
